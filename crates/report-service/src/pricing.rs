//! Per-item price multipliers applied to query results before the report is built.

use std::collections::HashMap;
use std::path::Path;

use report_model::{CellValue, Table};
use serde::Deserialize;

use crate::config::ConfigError;

/// Multiplies the `price_column` of every row whose `key_column` text has an entry in
/// `factors`.
///
/// ```json
/// { "key_column": "Sku", "price_column": "Unit Price", "factors": { "SKU-1": 1.1 } }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceAdjustments {
    pub key_column: String,
    pub price_column: String,
    pub factors: HashMap<String, f64>,
}

impl PriceAdjustments {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::PriceFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::PriceFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply the multipliers in place and return the number of adjusted rows.
    pub fn apply(&self, table: &mut Table) -> usize {
        let (Some(key), Some(price)) = (
            table.column_index(&self.key_column),
            table.column_index(&self.price_column),
        ) else {
            tracing::warn!(
                key_column = %self.key_column,
                price_column = %self.price_column,
                "price adjustment columns not in result set; skipping"
            );
            return 0;
        };

        let mut adjusted = 0;
        table.update_column(price, |row, value| {
            let factor = row[key]
                .to_text()
                .and_then(|k| self.factors.get(k.trim()).copied());
            if let (Some(factor), Some(n)) = (factor, value.as_number()) {
                *value = CellValue::Number(n * factor);
                adjusted += 1;
            }
        });
        tracing::debug!(rows = adjusted, "applied price adjustments");
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use report_model::{Column, ColumnType};

    fn adjustments() -> PriceAdjustments {
        serde_json::from_str(
            r#"{"key_column":"Sku","price_column":"Price","factors":{"A-1":1.5,"B-2":0.5}}"#,
        )
        .unwrap()
    }

    fn table() -> Table {
        Table::from_rows(
            vec![
                Column::new("Sku", ColumnType::Text),
                Column::new("Price", ColumnType::Float),
            ],
            vec![
                vec![CellValue::from("A-1"), CellValue::from(10.0)],
                vec![CellValue::from("B-2"), CellValue::from("n/a")],
                vec![CellValue::from("C-3"), CellValue::from(4.0)],
                vec![CellValue::from("B-2"), CellValue::from(8.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn multiplies_matching_numeric_prices() {
        let mut table = table();
        assert_eq!(adjustments().apply(&mut table), 2);

        let prices: Vec<CellValue> = table.rows().iter().map(|r| r[1].clone()).collect();
        assert_eq!(
            prices,
            vec![
                CellValue::Number(15.0),
                CellValue::from("n/a"),
                CellValue::Number(4.0),
                CellValue::Number(4.0),
            ]
        );
    }

    #[test]
    fn missing_columns_leave_the_table_alone() {
        let mut table = table();
        let original = table.clone();
        let adjustments = PriceAdjustments {
            price_column: "Cost".to_string(),
            ..adjustments()
        };
        assert_eq!(adjustments.apply(&mut table), 0);
        assert_eq!(table, original);
    }

    #[test]
    fn loads_from_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        std::fs::write(
            &path,
            r#"{"key_column":"Sku","price_column":"Price","factors":{"A-1":1.5,"B-2":0.5}}"#,
        )
        .unwrap();
        assert_eq!(PriceAdjustments::load(&path).unwrap(), adjustments());

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            PriceAdjustments::load(&path),
            Err(ConfigError::PriceFormat { .. })
        ));
    }
}

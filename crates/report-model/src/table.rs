use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CellValue;

/// Type inferred for a result column by the data source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    /// Any source type without a dedicated mapping (rendered as text).
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("row {row} has {actual} values but the table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// An ordered result set: named, typed columns plus fixed-width rows.
///
/// Every row has exactly `columns().len()` values, aligned positionally to the
/// column descriptors. Row order is significant and preserved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Create an empty table. Column names must be unique.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Build a table in one go, validating every row.
    pub fn from_rows(
        columns: Vec<Column>,
        rows: impl IntoIterator<Item = Vec<CellValue>>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Position of the column named `name` (exact match).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rewrite the values of one column in place.
    ///
    /// Row width cannot change through this API, so the table invariant holds.
    pub fn update_column<F>(&mut self, index: usize, mut f: F)
    where
        F: FnMut(&[CellValue], &mut CellValue),
    {
        if index >= self.columns.len() {
            return;
        }
        for row in &mut self.rows {
            let mut value = std::mem::take(&mut row[index]);
            f(row, &mut value);
            row[index] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("Date", ColumnType::Text),
            Column::new("Qty", ColumnType::Integer),
        ]
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Table::new(vec![
            Column::new("Qty", ColumnType::Integer),
            Column::new("Qty", ColumnType::Float),
        ])
        .unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("Qty".to_string()));
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut table = Table::new(columns()).unwrap();
        table
            .push_row(vec!["2024-01-01".into(), 5i64.into()])
            .unwrap();
        let err = table.push_row(vec!["2024-01-02".into()]).unwrap_err();
        assert_eq!(
            err,
            TableError::RowWidth {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn update_column_sees_whole_row() {
        let mut table = Table::from_rows(
            columns(),
            vec![
                vec!["a".into(), 2i64.into()],
                vec!["b".into(), CellValue::Empty],
            ],
        )
        .unwrap();

        table.update_column(1, |row, value| {
            if row[0] == CellValue::from("a") {
                if let Some(n) = value.as_number() {
                    *value = CellValue::Number(n * 10.0);
                }
            }
        });

        assert_eq!(table.rows()[0][1], CellValue::Number(20.0));
        assert_eq!(table.rows()[1][1], CellValue::Empty);
        assert_eq!(table.column_index("Qty"), Some(1));
        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["Date", "Qty"]);
    }
}

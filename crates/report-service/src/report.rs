//! Report orchestration: fetch, adjust, fill the template.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use report_xlsx::replace_sheet_data_in_bytes;

use crate::config::EmptyResultPolicy;
use crate::error::ReportError;
use crate::pricing::PriceAdjustments;
use crate::query::QuerySource;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// A finished workbook ready for delivery.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub rows: usize,
}

/// Output file name for a report generated at `at`.
pub fn report_file_name(at: DateTime<Utc>) -> String {
    at.format("InventoryReport_%Y%m%dT%H%M%SZ.xlsx").to_string()
}

pub struct ReportGenerator {
    template_path: PathBuf,
    sheet_name: String,
    empty_result: EmptyResultPolicy,
    price_adjustments: Option<PriceAdjustments>,
    source: Arc<dyn QuerySource>,
}

impl ReportGenerator {
    pub fn new(
        template_path: impl Into<PathBuf>,
        sheet_name: impl Into<String>,
        source: Arc<dyn QuerySource>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            sheet_name: sheet_name.into(),
            empty_result: EmptyResultPolicy::default(),
            price_adjustments: None,
            source,
        }
    }

    #[must_use]
    pub fn with_empty_result(mut self, policy: EmptyResultPolicy) -> Self {
        self.empty_result = policy;
        self
    }

    #[must_use]
    pub fn with_price_adjustments(mut self, adjustments: Option<PriceAdjustments>) -> Self {
        self.price_adjustments = adjustments;
        self
    }

    pub fn template_path(&self) -> &std::path::Path {
        &self.template_path
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Run `query` and fill the template with its result.
    ///
    /// The template is re-read for every call and never written.
    pub async fn generate(&self, query: &str) -> Result<GeneratedReport, ReportError> {
        let template = tokio::fs::read(&self.template_path)
            .await
            .map_err(|source| ReportError::TemplateNotFound {
                path: self.template_path.clone(),
                source,
            })?;

        let mut table = self.source.execute(query).await?;
        tracing::info!(
            rows = table.row_count(),
            columns = table.columns().len(),
            "fetched report data"
        );

        if let Some(adjustments) = &self.price_adjustments {
            adjustments.apply(&mut table);
        }

        if table.is_empty() && self.empty_result == EmptyResultPolicy::Reject {
            return Err(ReportError::EmptyResult);
        }

        let sheet_name = self.sheet_name.clone();
        let rows = table.row_count();
        let replaced = tokio::task::spawn_blocking(move || {
            replace_sheet_data_in_bytes(&template, &sheet_name, &table)
        })
        .await
        .map_err(|e| ReportError::Internal(e.to_string()))??;

        let file_name = report_file_name(Utc::now());
        tracing::info!(
            file = %file_name,
            rows,
            bytes = replaced.bytes.len(),
            "report built"
        );
        Ok(GeneratedReport {
            file_name,
            bytes: replaced.bytes,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_names_sort_by_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(report_file_name(at), "InventoryReport_20240309T070501Z.xlsx");
    }
}

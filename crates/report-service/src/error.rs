//! Request-level errors and their HTTP mapping.

use std::path::PathBuf;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use report_xlsx::DocumentError;
use serde::Serialize;
use thiserror::Error;

use crate::query::DataSourceError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("template not found at {path}")]
    TemplateNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template is not a valid workbook")]
    MalformedContainer(#[source] report_xlsx::XlsxError),
    #[error("sheet {sheet:?} not found in template")]
    SheetNotFound { sheet: String },
    #[error("query returned no rows")]
    EmptyResult,
    #[error("no query given")]
    MissingQuery,
    #[error("request body is not a valid report request")]
    InvalidBody(#[source] JsonRejection),
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to build report")]
    Build(#[source] DocumentError),
    #[error("report task failed: {0}")]
    Internal(String),
}

impl From<DocumentError> for ReportError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::MalformedContainer(source) => Self::MalformedContainer(source),
            DocumentError::SheetNotFound { sheet } => Self::SheetNotFound { sheet },
            other => Self::Build(other),
        }
    }
}

impl ReportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyResult | Self::MissingQuery => StatusCode::BAD_REQUEST,
            Self::InvalidBody(rejection) => rejection.status(),
            Self::DataSource(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::DataSource(_) | Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::TemplateNotFound { .. }
            | Self::MalformedContainer(_)
            | Self::SheetNotFound { .. }
            | Self::Build(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateNotFound { .. } => "template_not_found",
            Self::MalformedContainer(_) => "malformed_container",
            Self::SheetNotFound { .. } => "sheet_not_found",
            Self::EmptyResult => "empty_result",
            Self::MissingQuery => "missing_query",
            Self::InvalidBody(_) => "invalid_body",
            Self::DataSource(_) => "data_source_error",
            Self::Storage(_) => "storage_error",
            Self::Build(_) => "build_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TemplateNotFound { .. } => Some("check REPORT_TEMPLATE_PATH"),
            Self::SheetNotFound { .. } => Some("check REPORT_SHEET_NAME against the template's tab names"),
            Self::EmptyResult => Some("the query matched no rows; adjust its filters"),
            Self::MissingQuery => Some("pass the SQL as ?query=... or as {\"query\": ...} in the body"),
            Self::InvalidBody(_) => {
                Some("send {\"query\": \"...\"} with Content-Type: application/json")
            }
            Self::DataSource(e) => e.hint(),
            _ => None,
        }
    }

    /// Display text followed by the direct cause, for the response body.
    pub fn message(&self) -> String {
        let cause: Option<&dyn std::fmt::Display> = match self {
            Self::TemplateNotFound { source, .. } => Some(source),
            Self::MalformedContainer(source) => Some(source),
            Self::InvalidBody(rejection) => Some(rejection),
            Self::Build(source) => Some(source),
            _ => None,
        };
        match cause {
            Some(cause) => format!("{self}: {cause}"),
            None => self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "report generation failed: {}", self.message());
        } else {
            tracing::warn!(kind = self.kind(), "report request rejected: {}", self.message());
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.message(),
            hint: self.hint(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_errors_keep_their_kind() {
        let err = ReportError::from(DocumentError::SheetNotFound {
            sheet: "Data".to_string(),
        });
        assert_eq!(err.kind(), "sheet_not_found");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ReportError::from(DocumentError::Adapter(report_xlsx::XlsxError::Invalid(
            "bad".to_string(),
        )));
        assert_eq!(err.kind(), "build_error");
    }

    #[test]
    fn data_source_status_follows_sqlstate() {
        let syntax = ReportError::DataSource(DataSourceError::Query {
            code: Some("42601".to_string()),
            message: "syntax error at or near \"SELEC\"".to_string(),
        });
        assert_eq!(syntax.status(), StatusCode::BAD_REQUEST);
        assert!(syntax.hint().is_some());

        let down = ReportError::DataSource(DataSourceError::Connection {
            message: "connection refused".to_string(),
        });
        assert_eq!(down.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn empty_result_is_a_client_error() {
        assert_eq!(ReportError::EmptyResult.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ReportError::MissingQuery.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn causes_are_reported_once() {
        let err = ReportError::MalformedContainer(report_xlsx::XlsxError::Invalid(
            "no workbook part".to_string(),
        ));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("invalid xlsx: no workbook part"));
        assert!(!err.to_string().contains("no workbook part"));
        assert_eq!(
            err.message(),
            "template is not a valid workbook: invalid xlsx: no workbook part"
        );

        let missing = ReportError::TemplateNotFound {
            path: PathBuf::from("/srv/template.xlsx"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(missing.to_string(), "template not found at /srv/template.xlsx");
        assert_eq!(missing.message(), "template not found at /srv/template.xlsx: gone");

        assert_eq!(ReportError::EmptyResult.message(), "query returned no rows");
    }
}

//! Query collaborator: run SQL text and return a typed [`Table`].

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use report_model::{CellValue, Column, ColumnType, Table, TableError};
use thiserror::Error;
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, SimpleQueryMessage};

use crate::config::PostgresConfig;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("database connection failed: {message}")]
    Connection { message: String },
    /// The server rejected or failed the query. `code` is the SQLSTATE when one was sent.
    #[error("database query failed: {message}")]
    Query {
        code: Option<String>,
        message: String,
    },
    #[error("cannot decode value {value:?} of column {column:?} as {expected}")]
    Decode {
        column: String,
        value: String,
        expected: &'static str,
    },
    #[error("invalid result set: {0}")]
    Table(#[from] TableError),
}

impl DataSourceError {
    fn query(err: tokio_postgres::Error) -> Self {
        let code = err.code().map(|c| c.code().to_string());
        let message = match err.as_db_error() {
            Some(db) => match db.detail() {
                Some(detail) => format!("{}: {detail}", db.message()),
                None => db.message().to_string(),
            },
            None => err.to_string(),
        };
        Self::Query { code, message }
    }

    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Errors caused by the query text itself (syntax error or access rule
    /// violation, SQLSTATE class `42`).
    pub fn is_client_error(&self) -> bool {
        self.sqlstate().is_some_and(|code| code.starts_with("42"))
    }

    /// Remediation hint selected from the SQLSTATE.
    pub fn hint(&self) -> Option<&'static str> {
        if let Self::Connection { .. } = self {
            return Some("check that the database is reachable (POSTGRES_HOST, POSTGRES_PORT)");
        }
        let code = self.sqlstate()?;
        let hint = match code {
            "42P01" => "a table in the query does not exist; check its name and schema",
            "42703" => "a column in the query does not exist; check the column names",
            "42601" => "the query has a syntax error",
            "42501" => "the database user is not allowed to read these tables",
            "42883" => "a function or operator in the query does not exist for these argument types",
            "57014" => "the query was cancelled by the server (statement timeout)",
            _ if code.starts_with("28") => "check the database credentials (POSTGRES_USER, POSTGRES_PASSWORD)",
            _ if code.starts_with("3D") => "check the configured database name (POSTGRES_DB)",
            _ if code.starts_with("08") => "the database connection was lost; retry the request",
            _ => return None,
        };
        Some(hint)
    }
}

impl From<tokio_postgres::Error> for DataSourceError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::query(err)
    }
}

#[async_trait::async_trait]
pub trait QuerySource: Send + Sync {
    /// Run `query` and collect every row. The text is passed through unvalidated.
    async fn execute(&self, query: &str) -> Result<Table, DataSourceError>;
}

/// `PostgreSQL` query source. A fresh connection is opened per query.
pub struct PostgresQuerySource {
    config: PostgresConfig,
}

impl PostgresQuerySource {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl QuerySource for PostgresQuerySource {
    async fn execute(&self, query: &str) -> Result<Table, DataSourceError> {
        let (client, connection) = self
            .config
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| DataSourceError::Connection {
                message: e.to_string(),
            })?;

        // Spawn connection in background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        // Preparing yields column names and types without running the query.
        let statement = client.prepare(query).await?;
        let columns: Vec<(String, Type)> = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_().clone()))
            .collect();

        let mut table = Table::new(
            columns
                .iter()
                .map(|(name, ty)| Column::new(name.clone(), column_type(ty)))
                .collect(),
        )?;

        for message in client.simple_query(query).await? {
            let SimpleQueryMessage::Row(row) = message else {
                continue;
            };
            let mut values = Vec::with_capacity(columns.len());
            for (idx, (name, ty)) in columns.iter().enumerate() {
                let value = match row.try_get(idx)? {
                    Some(text) => decode_text(name, ty, text)?,
                    None => CellValue::Empty,
                };
                values.push(value);
            }
            table.push_row(values)?;
        }

        tracing::debug!(
            columns = table.columns().len(),
            rows = table.row_count(),
            "query returned"
        );
        Ok(table)
    }
}

/// Inferred column type for a `PostgreSQL` type.
pub fn column_type(ty: &Type) -> ColumnType {
    match *ty {
        Type::BOOL => ColumnType::Boolean,
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => ColumnType::Integer,
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => ColumnType::Float,
        Type::DATE => ColumnType::Date,
        Type::TIMESTAMP | Type::TIMESTAMPTZ => ColumnType::DateTime,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::CHAR | Type::UUID => {
            ColumnType::Text
        }
        _ => ColumnType::Other,
    }
}

/// Convert one value from the text protocol into a typed cell.
///
/// Dates outside chrono's range (`infinity`, BC dates) are kept as text.
pub fn decode_text(column: &str, ty: &Type, text: &str) -> Result<CellValue, DataSourceError> {
    let decode_err = |expected| DataSourceError::Decode {
        column: column.to_string(),
        value: text.to_string(),
        expected,
    };

    let value = match column_type(ty) {
        ColumnType::Boolean => match text {
            "t" | "true" => CellValue::Boolean(true),
            "f" | "false" => CellValue::Boolean(false),
            _ => return Err(decode_err("boolean")),
        },
        ColumnType::Integer => CellValue::Number(
            text.parse::<i64>().map_err(|_| decode_err("integer"))? as f64,
        ),
        ColumnType::Float => {
            CellValue::Number(text.parse::<f64>().map_err(|_| decode_err("number"))?)
        }
        ColumnType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_or_else(|_| CellValue::String(text.to_string()), CellValue::Date),
        ColumnType::DateTime if *ty == Type::TIMESTAMPTZ => {
            DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z").map_or_else(
                |_| CellValue::String(text.to_string()),
                |dt| CellValue::DateTime(dt.naive_utc()),
            )
        }
        ColumnType::DateTime => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map_or_else(|_| CellValue::String(text.to_string()), CellValue::DateTime),
        ColumnType::Text | ColumnType::Other => CellValue::String(text.to_string()),
    };
    Ok(value)
}

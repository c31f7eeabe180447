//! Service configuration, read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var} is required when {reason}")]
    Missing {
        var: &'static str,
        reason: &'static str,
    },
    #[error("failed to read price adjustments from {path}")]
    PriceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid price adjustments in {path}")]
    PriceFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How a generated report reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Stream the workbook back as an attachment.
    #[default]
    Download,
    /// Upload to object storage and redirect to the returned URL.
    Upload,
}

impl FromStr for DeliveryMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "download" => Ok(Self::Download),
            "upload" => Ok(Self::Upload),
            _ => Err(()),
        }
    }
}

/// What to do when the query returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyResultPolicy {
    /// Answer 400 without building a workbook.
    #[default]
    Reject,
    /// Build the report anyway; the data sheet is left cleared.
    EmptyReport,
}

impl FromStr for EmptyResultPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "empty-report" | "empty_report" => Ok(Self::EmptyReport),
            _ => Err(()),
        }
    }
}

/// `PostgreSQL` connection settings.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PostgresConfig {
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user);
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        config
    }
}

/// S3 (or S3-compatible) upload target.
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores; forces path-style addressing.
    pub endpoint: Option<String>,
    /// Key prefix for uploaded reports (e.g. `reports/`).
    pub prefix: String,
    /// When set, uploads are linked as `{public_base_url}/{key}` instead of presigned.
    pub public_base_url: Option<String>,
    pub presign_expiry: Duration,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .field("public_base_url", &self.public_base_url)
            .field("presign_expiry", &self.presign_expiry)
            .field("static_credentials", &self.access_key_id.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub template_path: PathBuf,
    pub sheet_name: String,
    pub delivery: DeliveryMode,
    pub empty_result: EmptyResultPolicy,
    pub price_adjustments_path: Option<PathBuf>,
    pub postgres: PostgresConfig,
    /// `None` when no bucket is configured.
    pub s3: Option<S3Config>,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TEMPLATE_PATH: &str = "templates/InventoryReport.xlsx";
pub const DEFAULT_SHEET_NAME: &str = "Master Data";
const DEFAULT_PRESIGN_SECS: u64 = 3600;

impl ServiceConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let delivery = match get("REPORT_DELIVERY") {
            Some(v) => v.parse().map_err(|()| ConfigError::Invalid {
                var: "REPORT_DELIVERY",
                value: v,
                expected: "`download` or `upload`",
            })?,
            None => DeliveryMode::default(),
        };
        let empty_result = match get("REPORT_EMPTY_RESULT") {
            Some(v) => v.parse().map_err(|()| ConfigError::Invalid {
                var: "REPORT_EMPTY_RESULT",
                value: v,
                expected: "`reject` or `empty-report`",
            })?,
            None => EmptyResultPolicy::default(),
        };

        let port = match get("POSTGRES_PORT") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "POSTGRES_PORT",
                value: v,
                expected: "a TCP port number",
            })?,
            None => 5432,
        };
        let postgres = PostgresConfig {
            host: get("POSTGRES_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            database: get("POSTGRES_DB").unwrap_or_else(|| "inventory".to_string()),
            user: get("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string()),
            password: get("POSTGRES_PASSWORD").unwrap_or_default(),
        };

        let s3 = match get("REPORT_S3_BUCKET") {
            Some(bucket) => {
                let presign_secs = match get("REPORT_S3_PRESIGN_SECS") {
                    Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                        var: "REPORT_S3_PRESIGN_SECS",
                        value: v,
                        expected: "a number of seconds",
                    })?,
                    None => DEFAULT_PRESIGN_SECS,
                };
                Some(S3Config {
                    bucket,
                    region: get("REPORT_S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                    endpoint: get("REPORT_S3_ENDPOINT"),
                    prefix: get("REPORT_S3_PREFIX").unwrap_or_default(),
                    public_base_url: get("REPORT_S3_PUBLIC_BASE_URL")
                        .map(|url| url.trim_end_matches('/').to_string()),
                    presign_expiry: Duration::from_secs(presign_secs),
                    access_key_id: get("AWS_ACCESS_KEY_ID"),
                    secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                })
            }
            None => None,
        };

        if delivery == DeliveryMode::Upload && s3.is_none() {
            return Err(ConfigError::Missing {
                var: "REPORT_S3_BUCKET",
                reason: "REPORT_DELIVERY=upload",
            });
        }

        Ok(Self {
            bind_addr: get("REPORT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            template_path: get("REPORT_TEMPLATE_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH), PathBuf::from),
            sheet_name: get("REPORT_SHEET_NAME").unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
            delivery,
            empty_result,
            price_adjustments_path: get("REPORT_PRICE_ADJUSTMENTS").map(PathBuf::from),
            postgres,
            s3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.template_path, PathBuf::from(DEFAULT_TEMPLATE_PATH));
        assert_eq!(config.sheet_name, "Master Data");
        assert_eq!(config.delivery, DeliveryMode::Download);
        assert_eq!(config.empty_result, EmptyResultPolicy::Reject);
        assert_eq!(config.postgres.port, 5432);
        assert!(config.s3.is_none());
    }

    #[test]
    fn upload_requires_a_bucket() {
        let err = config(&[("REPORT_DELIVERY", "upload")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "REPORT_S3_BUCKET", .. }));

        let config = config(&[
            ("REPORT_DELIVERY", "Upload"),
            ("REPORT_S3_BUCKET", "reports"),
            ("REPORT_S3_PUBLIC_BASE_URL", "https://cdn.example.com/reports/"),
            ("REPORT_S3_PRESIGN_SECS", "600"),
        ])
        .unwrap();
        let s3 = config.s3.unwrap();
        assert_eq!(s3.bucket, "reports");
        assert_eq!(s3.public_base_url.as_deref(), Some("https://cdn.example.com/reports"));
        assert_eq!(s3.presign_expiry, Duration::from_secs(600));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            config(&[("REPORT_EMPTY_RESULT", "maybe")]),
            Err(ConfigError::Invalid { var: "REPORT_EMPTY_RESULT", .. })
        ));
        assert!(matches!(
            config(&[("POSTGRES_PORT", "http")]),
            Err(ConfigError::Invalid { var: "POSTGRES_PORT", .. })
        ));
        assert_eq!(
            config(&[("REPORT_EMPTY_RESULT", "empty-report")]).unwrap().empty_result,
            EmptyResultPolicy::EmptyReport
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = config(&[
            ("POSTGRES_PASSWORD", "hunter2"),
            ("REPORT_S3_BUCKET", "reports"),
            ("AWS_SECRET_ACCESS_KEY", "very-secret"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("very-secret"));
    }
}

//! Inventory report service.
//!
//! Runs a SQL query, loads the result into the data sheet of an XLSX template
//! (charts, pivots and formatting are kept) and either returns the workbook or
//! uploads it and redirects to the stored copy.

mod config;
mod error;
mod handlers;
mod pricing;
mod query;
mod report;
mod storage;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::{
    ConfigError, DeliveryMode, EmptyResultPolicy, PostgresConfig, S3Config, ServiceConfig,
};
pub use error::{ErrorBody, ReportError};
pub use handlers::{GenerateRequest, HealthResponse};
pub use pricing::PriceAdjustments;
pub use query::{column_type, decode_text, DataSourceError, PostgresQuerySource, QuerySource};
pub use report::{report_file_name, GeneratedReport, ReportGenerator, XLSX_CONTENT_TYPE};
pub use storage::{ReportStorage, S3ReportStorage, StorageError, StorageResult};

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<ReportGenerator>,
    /// Required for [`DeliveryMode::Upload`].
    pub storage: Option<Arc<dyn ReportStorage>>,
    pub delivery: DeliveryMode,
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/report/health", get(handlers::health))
        .route(
            "/api/report/generate",
            get(handlers::generate_get).post(handlers::generate_post),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

/// Start the server
pub async fn start_server(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting report service on {}", listener.local_addr()?);
    serve(listener, state).await
}

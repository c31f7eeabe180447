//! HTTP handlers for the report endpoints.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::DeliveryMode;
use crate::error::ReportError;
use crate::report::XLSX_CONTENT_TYPE;
use crate::storage::StorageError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub template_path: String,
    pub sheet_name: String,
    pub delivery: DeliveryMode,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        template_path: state.generator.template_path().display().to_string(),
        sheet_name: state.generator.sheet_name().to_string(),
        delivery: state.delivery,
    })
}

/// `GET /api/report/generate?query=...`
pub async fn generate_get(
    State(state): State<AppState>,
    Query(request): Query<GenerateRequest>,
) -> Result<Response, ReportError> {
    generate(&state, request).await
}

/// `POST /api/report/generate` with `{"query": "..."}`
pub async fn generate_post(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ReportError> {
    let Json(request) = payload.map_err(ReportError::InvalidBody)?;
    generate(&state, request).await
}

async fn generate(state: &AppState, request: GenerateRequest) -> Result<Response, ReportError> {
    let query = request
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or(ReportError::MissingQuery)?;
    tracing::info!(delivery = ?state.delivery, "report requested");

    let report = state.generator.generate(&query).await?;

    match state.delivery {
        DeliveryMode::Download => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", report.file_name),
                ),
            ],
            report.bytes,
        )
            .into_response()),
        DeliveryMode::Upload => {
            let storage = state.storage.as_ref().ok_or(StorageError::NotConfigured)?;
            let url = storage
                .upload(report.bytes, &report.file_name, XLSX_CONTENT_TYPE)
                .await?;
            Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
        }
    }
}

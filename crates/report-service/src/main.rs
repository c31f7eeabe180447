//! Report service binary entry point

use std::sync::Arc;

use anyhow::Context;
use report_service::{
    start_server, AppState, DeliveryMode, PostgresQuerySource, PriceAdjustments, ReportGenerator,
    ReportStorage, S3ReportStorage, ServiceConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set variables directly.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "report_service=info,report_xlsx=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("loaded environment from {}", path.display());
    }

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    if !config.template_path.is_file() {
        tracing::warn!(
            path = %config.template_path.display(),
            "template not found; requests will fail until it is present"
        );
    }

    let price_adjustments = config
        .price_adjustments_path
        .as_deref()
        .map(PriceAdjustments::load)
        .transpose()
        .context("failed to load price adjustments")?;

    let source = Arc::new(PostgresQuerySource::new(config.postgres.clone()));
    let generator = ReportGenerator::new(&config.template_path, &config.sheet_name, source)
        .with_empty_result(config.empty_result)
        .with_price_adjustments(price_adjustments);

    let storage: Option<Arc<dyn ReportStorage>> = match &config.s3 {
        Some(s3) => Some(Arc::new(S3ReportStorage::new(s3).await)),
        None => None,
    };
    if config.delivery == DeliveryMode::Upload {
        tracing::info!(bucket = ?config.s3.as_ref().map(|s3| &s3.bucket), "reports will be uploaded");
    }

    let state = AppState {
        generator: Arc::new(generator),
        storage,
        delivery: config.delivery,
    };

    start_server(&config.bind_addr, state)
        .await
        .context("server error")?;
    Ok(())
}

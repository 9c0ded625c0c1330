mod config;
mod error;
mod rate_limit;
mod server;
mod validation;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use compliance_common::classifier::ZeroShotClient;
use compliance_common::db::Database;
use compliance_common::guidelines::GuidelineStore;
use compliance_common::submissions::SubmissionStore;

use config::Config;
use rate_limit::ClassifierBudget;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting compliance server");

    let config = Config::from_env()?;
    info!(
        database_path = %config.database_path,
        listen_addr = %config.listen_addr,
        "configuration loaded"
    );

    let db = Database::open(&config.database_path)?;
    info!("database ready");

    info!(
        url = %config.classifier.url,
        timeout_ms = config.classifier.default_timeout.as_millis(),
        max_retries = config.classifier.max_retries,
        "classifier configured"
    );
    let classifier = Arc::new(ZeroShotClient::new(config.classifier.clone())?);

    let budget = ClassifierBudget::from_env();
    if let Some(budget) = &budget {
        info!(rps = budget.per_second(), "classifier rate limit enabled");
    }

    let state = AppState::new(
        GuidelineStore::new(db.clone()),
        SubmissionStore::new(db),
        classifier,
        budget,
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP server ready");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
        })?;

    info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

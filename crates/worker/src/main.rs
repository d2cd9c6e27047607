//! Worker entry point.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{Config, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // 1. Initialize tracing
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tracing::info!(?config, "starting worker");

    // 3. Run the checkout
    let outcome = worker::checkout::run(&config).await;

    let code = match outcome {
        Ok(summary) => {
            tracing::info!(
                order_id = %summary.order_id,
                code = summary.code,
                status = %summary.status,
                total_value = %summary.total_value,
                charged = %summary.charged,
                events = ?summary.published,
                notifications = summary.notifications.len(),
                "checkout settled"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "checkout failed");
            ExitCode::FAILURE
        }
    };

    tracing::info!("metrics snapshot:\n{}", metrics_handle.render());
    code
}

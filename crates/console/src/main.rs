//! Console entry point.

use console::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, stopping");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, stopping");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Render the live item list until the writes settle or a signal arrives
    tracing::info!(?config, "starting query console");
    let mut stdout = std::io::stdout().lock();
    let outcome = console::run(config, shutdown_signal(), &mut stdout).await;

    tracing::info!(metrics = %metrics_handle.render(), "final metrics");
    match outcome {
        Ok(summary) => {
            tracing::info!(
                renders = summary.renders,
                failures = summary.failures,
                items = summary.items,
                "console finished"
            );
        }
        Err(error) => {
            tracing::error!(%error, "console failed");
            std::process::exit(1);
        }
    }
}

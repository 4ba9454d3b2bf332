//! Demo entry point.

use demo::config::Config;
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
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Build the coordinators and start relaying saga events
    let app = demo::create_default_app(&config)
        .await
        .expect("failed to create application");
    let forwarder = demo::forward_saga_notifications(&app.orchestrator, app.relay.clone());
    app.relay.start().await;

    // 4. Run the example scenarios
    match demo::run_scenarios(&app).await {
        Ok(report) => tracing::info!(
            fulfilled = %report.fulfilled_order,
            rejected = %report.rejected_order,
            committed = report.committed.success,
            aborted_in = %report.aborted.phase,
            "scenarios finished"
        ),
        Err(e) => tracing::error!(error = %e, "scenario failed"),
    }

    tracing::info!("running, press Ctrl+C to stop");
    shutdown_signal().await;

    // 5. Flush the outbox and report
    forwarder.abort();
    match app.relay.shutdown().await {
        Ok(report) => tracing::info!(published = report.published, "outbox flushed"),
        Err(e) => tracing::error!(error = %e, "final outbox sweep failed"),
    }
    if let Ok(stats) = app.relay.get_stats().await {
        tracing::info!(?stats, "outbox stats");
    }
    tracing::info!(sagas = ?app.orchestrator.stats().await, "saga stats");
    tracing::info!(transactions = ?app.coordinator.stats().await, "2pc stats");

    println!("{}", metrics_handle.render());
    tracing::info!("shut down gracefully");
}

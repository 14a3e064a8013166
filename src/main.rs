use lingualens_accounts::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tokio::signal;

use std::time::Duration;

#[tokio::main]
async fn main() {
    telemetry::setup_logging();

    let metrics_handle = telemetry::setup_metrics_recorder()
        .expect("failed to install Prometheus recorder");

    let state = initialize_state()
        .await
        .expect("failed to initialize state")
        .with_metrics(metrics_handle);

    // Periodic roster synchronization.
    if let Some(interval) = state
        .config
        .federation
        .as_ref()
        .and_then(|federation| federation.sync_interval)
        .filter(|_| state.reconciler.has_provider())
    {
        let reconciler = state.reconciler.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                if let Err(err) = reconciler.sync().await {
                    tracing::error!(error = %err, "scheduled synchronization failed");
                }
            }
        });
        tracing::info!(interval, "scheduled synchronization enabled");
    }

    let port = state.config.port;
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind port");

    tracing::info!(port, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("failed to start server");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}

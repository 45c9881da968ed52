use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use realtime_fanout::config::Settings;
use realtime_fanout::error::AppError;
use realtime_fanout::server::{create_app, AppState};
use realtime_fanout::tasks::SubscriberSweepTask;
use realtime_fanout::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;
    telemetry::init_logging(&settings.log);
    tracing::info!("Configuration loaded");

    // Bind failures are misconfiguration: report and stop
    let (state, push_stream) = AppState::bind(settings.clone()).await?;
    tracing::info!("Transports bound");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(push_stream.run());
    tokio::spawn(state.notify.clone().run());

    let sweep_handle = settings.udp.subscriber_ttl().map(|ttl| {
        let task = SubscriberSweepTask::new(
            state.notify.clone(),
            ttl,
            std::time::Duration::from_secs(settings.udp.sweep_interval_secs),
            shutdown_tx.subscribe(),
        );
        tokio::spawn(task.run())
    });

    // Create Axum app
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::bind(&addr, e))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    if let Some(handle) = sweep_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}

use plate_engine::{EngineConfig, PlateEngine};
use std::sync::Arc;
use stream_node::{router, AppState, Config};
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config = LogConfig::new("stream-node").with_version(env!("CARGO_PKG_VERSION"));
    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = telemetry::init_structured_logging(log_config);

    let config = Config::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    info!(backend = ?engine_config.backend, "loading plate engine");
    let engine = Arc::new(PlateEngine::from_config(&engine_config)?);
    info!(
        detector = engine.detector_id(),
        recognizer = engine.recognizer_id(),
        "plate engine ready"
    );

    let bind_addr = config.bind_addr.clone();
    let app = router(AppState::with_system_sources(engine, config));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "stream-node started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stream-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

//! batchgate gateway binary.
//!
//! - Config: first CLI argument, else `BATCHGATE_CONFIG`, else `batchgate.yaml`
//! - Starts the `autostart` agents, then serves HTTP
//! - Ctrl-C / SIGTERM: mark draining, close every batcher, let in-flight requests finish

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use batchgate_core::error::{BatchGateError, Result};
use batchgate_gateway::{app_state::AppState, config, router};

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "batchgate-gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = config::resolve_path(
        std::env::args().nth(1),
        std::env::var(config::CONFIG_ENV).ok(),
    );
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .server
        .listen
        .parse()
        .map_err(|e| BatchGateError::BadRequest(format!("server.listen: {e}")))?;

    let state = AppState::new(cfg)?;
    let started = state.autostart()?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, agents = started, "batchgate-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| BatchGateError::Internal(format!("bind {listen} failed: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|e| BatchGateError::Internal(format!("server failed: {e}")))?;

    tracing::info!("batchgate-gateway stopped");
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, draining");

    let grace = state.shutdown_grace();
    if tokio::time::timeout(grace, state.shutdown()).await.is_err() {
        tracing::warn!(grace_ms = grace.as_millis() as u64, "drain exceeded grace period");
    }
}

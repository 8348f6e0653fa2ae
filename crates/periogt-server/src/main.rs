//! PerioGT Server - HTTP API for polymer property inference

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use periogt_core::PerioRuntime;
use state::AppState;

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "periogt_server=info,periogt_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PerioGT server");

    let runtime = Arc::new(PerioRuntime::from_env()?);
    let state = AppState::from_env(runtime.clone());
    info!(
        "Concurrency ceiling: {} requests, API key {}",
        state.max_concurrent,
        if state.api_key.is_some() { "required" } else { "not required" }
    );

    // Warm the index in the background; health reports progress meanwhile.
    tokio::spawn(async move {
        match runtime.initialize().await {
            Ok(()) => info!("Artifacts verified and index loaded"),
            Err(e) => warn!("Runtime not ready: {}", e),
        }
    });

    let app = api::create_router(state.clone());

    let host = std::env::var("PERIOGT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = match std::env::var("PERIOGT_PORT") {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid PERIOGT_PORT='{}', falling back to {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
    };
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(state));

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
    drop(state);
}

//! # Call Voice Bridge - Main Application Entry Point
//!
//! Relays live phone-call audio between a telephony media-stream WebSocket and
//! a generative voice model's bidirectional streaming WebSocket.
//!
//! ## Application Architecture:
//! - **audio**: μ-law companding and the 8/16/24 kHz resamplers
//! - **telephony**: media-stream protocol, per-connection session, WebSocket actor
//! - **model**: voice model protocol, client and connector
//! - **call**: call records, registry, collaborators and the bridge between legs
//! - **config**: configuration (defaults, config.toml, environment variables)
//! - **middleware**: connection logging
//! - **error**: error types and HTTP error responses

mod audio;
mod call;
mod config;
mod error;
mod middleware;
mod model;
mod state;
mod telephony;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup sequence:
/// 1. Load `.env`, initialise tracing
/// 2. Load and validate configuration
/// 3. Build shared state (model connector, call registry, collaborators)
/// 4. Serve `/media-stream` until the server exits or a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting call-voice-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::from_config(config)?;
    let shutdown_state = app_state.clone();

    let settings = &app_state.config;
    info!(
        model = %settings.model.model,
        voice = %settings.model.voice,
        max_concurrent_calls = settings.calls.max_concurrent_calls,
        "Voice model settings"
    );
    if settings.model.api_key.is_empty() {
        info!("No model API key configured; connecting without one");
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Logger::default())
            .wrap(middleware::ConnectionLogging)
            .route("/media-stream", web::get().to(telephony::media_stream))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            let active = shutdown_state.services.registry.active_call_ids();
            if !active.is_empty() {
                info!(calls = ?active, "Dropping {} active call(s)", active.len());
            }
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully after {}s", shutdown_state.get_uptime_seconds());
    Ok(())
}

/// Initialise tracing. `RUST_LOG` overrides the default filter
/// `call_voice_bridge=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_voice_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise [`SHUTDOWN_SIGNAL`].
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

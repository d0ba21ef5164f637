//! # Audio Ingest Backend - Main Application Entry Point
//!
//! This is the main entry point for the audio-ingest-backend server. It sets
//! up an Actix-web server whose central route is a WebSocket endpoint that
//! capture clients stream base64-encoded PCM chunks into.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML files + environment variables)
//! - **state**: shared application state and metrics
//! - **audio**: chunk accumulation, flush sink, and session lifecycle
//! - **websocket**: the per-connection ingest actor behind `/ws`
//! - **health**: system health monitoring endpoints
//! - **middleware**: request logging and metrics collection
//! - **handlers**: HTTP handlers for the config endpoints
//! - **error**: custom error types and HTTP error responses

mod audio;       // Accumulator, flush sink, session lifecycle (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // WebSocket ingest actor (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use audio::session::SessionManager;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared state**: config/metrics plus the session registry
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// ## Error Handling:
/// If any step fails (config loading, server binding, etc.), the function
/// returns an error and the process exits with a message. Bind failure is
/// the only startup-fatal condition once configuration has validated.
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-ingest-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Ingest profile: {} Hz, {} channel(s), {}-bit, flush every {} chunks",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.bit_depth,
        config.buffering.flush_threshold_chunks
    );

    // Shared state for all HTTP handlers and WebSocket actors
    let app_state = AppState::new(config.clone());

    // One process-wide session registry; every accepted connection registers
    // its session here so the concurrency ceiling is enforced globally
    let session_manager = web::Data::from(Arc::new(SessionManager::new(
        config.performance.max_concurrent_sessions,
    )));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(session_manager.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // The ingest endpoint capture clients connect to
            .route("/ws", web::get().to(websocket::ingest_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
            .default_service(web::route().to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
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
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: controls what gets logged (e.g., "debug",
///   "audio_ingest_backend=debug")
/// - If not set, defaults to "audio_ingest_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_ingest_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; whichever arrives first sets the global
/// shutdown flag so the server can finish in-flight requests before exiting.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

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

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms; async sleep keeps the check off the executor's
/// hot path.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

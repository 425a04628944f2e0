//! # Voice Talk Backend - Main Application Entry Point
//!
//! A voice-conversation server: clients stream speech over a WebSocket, the server
//! transcribes each utterance, generates a reply in persona and speaks it back.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared handles (service clients, history, session registry, metrics)
//! - **audio**: Frame decoding, downmix and utterance segmentation
//! - **conversation**: Bounded per-participant conversation history
//! - **session**: Single-flight gate, per-connection voice session, session registry
//! - **pipeline**: Transcribe → generate → synthesize orchestration and playback tracking
//! - **services**: HTTP clients for speech-to-text, Gemini and Style-Bert-VITS2
//! - **websocket**: The `/ws/voice` actor, one per voice session
//! - **health / handlers**: Monitoring and management HTTP endpoints
//! - **error**: Pipeline and HTTP error types

mod audio;
mod config;
mod conversation;
mod error;
mod handlers;
mod health;
mod pipeline;
mod services;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and environment variables
/// 2. **Sets up logging** with `RUST_LOG` filtering
/// 3. **Builds shared state**, including one client per external service
/// 4. **Configures the HTTP server** with CORS, request tracing and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-talk-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Audio: codec={} {}Hz x{}, silence cut-off {}ms, persona {}",
        config.audio.codec,
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.silence_duration_ms,
        config.generation.persona_name
    );
    if config.transcription.api_key.is_empty() || config.generation.api_key.is_empty() {
        warn!("GOOGLE_SPEECH_API_KEY or GEMINI_API_KEY is not set; voice turns will fail upstream");
    }

    let app_state = AppState::new(config.clone())?;
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
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session))
                    .route("/conversations", web::get().to(handlers::list_conversations))
                    .route(
                        "/conversations/{participant_id}",
                        web::get().to(handlers::get_conversation),
                    )
                    .route(
                        "/conversations/{participant_id}",
                        web::delete().to(handlers::clear_conversation),
                    )
                    .route("/chat", web::post().to(handlers::chat)),
            )
            .route("/ws/voice", web::get().to(websocket::voice_websocket))
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
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
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "debug", "voice_talk_backend=trace")
/// - If not set, defaults to "voice_talk_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_talk_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C). Either one sets the shutdown flag so
/// in-flight requests can finish before the server stops.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
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

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

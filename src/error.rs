//! # Error Handling
//!
//! Two error families live here:
//!
//! - **VoiceError**: failures inside the utterance pipeline. Each variant names the
//!   stage it came from, so a log line is enough to tell where a turn was lost.
//! - **AppError**: failures surfaced through the HTTP API, converted into JSON
//!   responses by the `ResponseError` implementation.
//!
//! ## Pipeline policy:
//! No pipeline error is ever propagated past the stage that produced it. The stage
//! logs it, the session releases its gate, and the utterance is dropped. There are
//! no retries anywhere; the speaker simply talks again.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Failures produced by one stage of the voice pipeline.
///
/// ## Handling per variant:
/// - **Decode**: the frame is skipped, the utterance keeps accumulating
/// - **Transcription / Generation / Synthesis**: the utterance is abandoned and
///   nothing is written to conversation history
/// - **Playback**: the gate is released and the turn is silently degraded
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Malformed or unsupported compressed frame
    Decode(String),

    /// The speech-to-text collaborator failed or returned garbage
    Transcription(String),

    /// The response-generation collaborator failed
    Generation(String),

    /// The speech-synthesis collaborator failed or returned unplayable audio
    Synthesis(String),

    /// The audio sink rejected the resource or reported an error while playing
    Playback(String),
}

impl VoiceError {
    /// Short machine-readable stage name, used in metrics and client messages.
    pub fn stage(&self) -> &'static str {
        match self {
            VoiceError::Decode(_) => "decode",
            VoiceError::Transcription(_) => "transcription",
            VoiceError::Generation(_) => "generation",
            VoiceError::Synthesis(_) => "synthesis",
            VoiceError::Playback(_) => "playback",
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Decode(msg) => write!(f, "Decode error: {}", msg),
            VoiceError::Transcription(msg) => write!(f, "Transcription error: {}", msg),
            VoiceError::Generation(msg) => write!(f, "Generation error: {}", msg),
            VoiceError::Synthesis(msg) => write!(f, "Synthesis error: {}", msg),
            VoiceError::Playback(msg) => write!(f, "Playback error: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

/// Error types returned by the HTTP API.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Upstream**: A speech or language service failed (502 errors)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("text must not be empty".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// An external collaborator (transcription, generation, synthesis) failed
    Upstream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

/// Converts API errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "upstream_error",
///     "message": "Generation error: status 503",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
            AppError::Upstream(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,  // 502
                "upstream_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anything that bubbles up through `anyhow` is an internal problem.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Pipeline failures reaching the HTTP layer (the text chat endpoint) are
/// reported as gateway errors, except playback which cannot happen there.
impl From<VoiceError> for AppError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Decode(_) => AppError::BadRequest(err.to_string()),
            VoiceError::Playback(_) => AppError::Internal(err.to_string()),
            _ => AppError::Upstream(err.to_string()),
        }
    }
}

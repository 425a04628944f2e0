use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Live voice sessions with their phase and counters.
pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let sessions = state.sessions.list();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_sessions": sessions.len(),
        "max_sessions": state.sessions.max_concurrent_sessions(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    state
        .sessions
        .get(&session_id)
        .map(|info| HttpResponse::Ok().json(info))
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))
}

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Conversation history for one participant, oldest message first.
pub async fn get_conversation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let participant_id = path.into_inner();
    let messages = state.history.get_conversation(&participant_id);

    Ok(HttpResponse::Ok().json(json!({
        "participant_id": participant_id,
        "message_count": messages.len(),
        "max_messages": state.history.max_messages(),
        "messages": messages
    })))
}

pub async fn clear_conversation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let participant_id = path.into_inner();

    if !state.history.clear(&participant_id) {
        return Err(AppError::NotFound(format!(
            "No conversation for participant '{}'",
            participant_id
        )));
    }

    tracing::info!("Cleared conversation history for {}", participant_id);
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "participant_id": participant_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Participants that currently have history.
pub async fn list_conversations(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let participants = state.history.participants();
    Ok(HttpResponse::Ok().json(json!({
        "count": participants.len(),
        "participants": participants
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::testing::FakeServices;
    use actix_web::{http::StatusCode, test, App};

    fn state() -> AppState {
        AppState::with_orchestrator(AppConfig::default(), FakeServices::new().orchestrator(10))
    }

    #[actix_web::test]
    async fn test_get_and_clear_conversation() {
        let state = state();
        state.history.record_exchange("alice", "hi", "hello!");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/conversations", web::get().to(list_conversations))
                .route("/conversations/{participant_id}", web::get().to(get_conversation))
                .route("/conversations/{participant_id}", web::delete().to(clear_conversation)),
        )
        .await;

        let req = test::TestRequest::get().uri("/conversations/alice").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message_count"], 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hello!");

        let req = test::TestRequest::get().uri("/conversations").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["participants"][0], "alice");

        let req = test::TestRequest::delete().uri("/conversations/alice").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.history.get_conversation("alice").is_empty());

        let req = test::TestRequest::delete().uri("/conversations/alice").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

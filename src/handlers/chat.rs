//! Text chat: the same generate-and-remember path as a voice turn, without audio.

use crate::pipeline::Participant;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub participant_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub text: String,
}

pub async fn chat(
    state: web::Data<AppState>,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();

    if request.participant_id.trim().is_empty() {
        return Err(AppError::ValidationError("participant_id must not be empty".to_string()));
    }
    let text = request.text.trim();
    if text.is_empty() {
        return Err(AppError::ValidationError("text must not be empty".to_string()));
    }

    let participant = Participant::new(request.participant_id.trim(), request.display_name);

    match state.orchestrator.respond_text(&participant, text).await {
        Ok(reply) => {
            state.record_chat(false);
            Ok(HttpResponse::Ok().json(json!({
                "participant_id": participant.id,
                "reply": reply,
                "timestamp": chrono::Utc::now().to_rfc3339()
            })))
        }
        Err(err) => {
            state.record_chat(true);
            tracing::warn!(participant = %participant.id, stage = err.stage(), "Chat reply failed: {}", err);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::testing::FakeServices;
    use actix_web::{http::StatusCode, test, App};

    async fn post(state: AppState, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/chat", web::post().to(chat)),
        )
        .await;
        let req = test::TestRequest::post().uri("/chat").set_json(body).to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let body: serde_json::Value = test::read_body_json(resp).await;
        (status, body)
    }

    #[actix_web::test]
    async fn test_chat_replies_and_records_history() {
        let state = AppState::with_orchestrator(
            AppConfig::default(),
            FakeServices::new().reply("hello, Aki!").orchestrator(10),
        );

        let (status, body) = post(
            state.clone(),
            json!({"participant_id": "aki", "display_name": "Aki", "text": "hi"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "hello, Aki!");
        assert_eq!(state.history.get_conversation("aki").len(), 2);
        assert_eq!(state.get_metrics_snapshot().chat_requests, 1);
    }

    #[actix_web::test]
    async fn test_generation_failure_is_bad_gateway_without_history() {
        let state = AppState::with_orchestrator(
            AppConfig::default(),
            FakeServices::new().fail_generation().orchestrator(10),
        );

        let (status, body) = post(state.clone(), json!({"participant_id": "aki", "text": "hi"})).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "upstream_error");
        assert!(state.history.get_conversation("aki").is_empty());
        assert_eq!(state.get_metrics_snapshot().chat_errors, 1);
    }

    #[actix_web::test]
    async fn test_blank_text_is_rejected() {
        let state = AppState::with_orchestrator(AppConfig::default(), FakeServices::new().orchestrator(10));
        let (status, _) = post(state, json!({"participant_id": "aki", "text": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

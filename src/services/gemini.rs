//! # Gemini Response Generator
//!
//! Calls `POST {endpoint}/models/{model}:generateContent` with the whole prompt
//! (persona instructions, prior turns, new utterance) as a single user part.
//! The reply is the concatenated text of the first candidate.

use crate::config::GenerationConfig;
use crate::error::VoiceError;
use crate::services::{GenerationRequest, ResponseGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClient {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl GeminiClient {
    pub fn new(config: GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

fn request_body(request: &GenerationRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: request.prompt_text(),
            }],
        }],
        generation_config: GenerationParams {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        },
    }
}

/// Text of the first candidate, or `None` when the model returned nothing usable.
fn first_candidate_text(response: GenerateContentResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|part| part.text).collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl ResponseGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, VoiceError> {
        let res = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| VoiceError::Generation(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "Gemini API error {}: {}",
                status, body
            )));
        }

        let parsed: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Generation(format!("response parse failed: {}", e)))?;

        let text = first_candidate_text(parsed)
            .ok_or_else(|| VoiceError::Generation("model returned no text".to_string()))?;

        debug!(model = %self.config.model, reply_chars = text.chars().count(), "Reply generated");
        Ok(text)
    }
}

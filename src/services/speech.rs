//! # Google Cloud Speech-to-Text Client
//!
//! Synchronous recognition over the `speech:recognize` REST endpoint.
//!
//! ## Request shape:
//! ```json
//! {
//!   "config": {
//!     "encoding": "LINEAR16",
//!     "sampleRateHertz": 48000,
//!     "languageCode": "ja-JP",
//!     "enableAutomaticPunctuation": true,
//!     "model": "default",
//!     "useEnhanced": true,
//!     "metadata": { "interactionType": "DICTATION", "recordingDeviceType": "OTHER_INDOOR_DEVICE" }
//!   },
//!   "audio": { "content": "<base64 mono s16le>" }
//! }
//! ```
//!
//! ## Response handling:
//! The first alternative of every result is kept and the transcripts are joined
//! with newlines. A response with no results is a valid empty transcript.

use crate::config::TranscriptionConfig;
use crate::error::VoiceError;
use crate::services::Transcriber;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    language_code: &'a str,
    enable_automatic_punctuation: bool,
    model: &'a str,
    use_enhanced: bool,
    metadata: RecognitionMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionMetadata {
    interaction_type: &'static str,
    recording_device_type: &'static str,
}

#[derive(Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

pub struct GoogleSpeechClient {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

impl GoogleSpeechClient {
    pub fn new(config: TranscriptionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn request_body(&self, mono_pcm: &[u8], sample_rate: u32) -> RecognizeRequest<'_> {
        RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: sample_rate,
                language_code: &self.config.language_code,
                enable_automatic_punctuation: self.config.enable_automatic_punctuation,
                model: &self.config.model,
                use_enhanced: self.config.use_enhanced,
                metadata: RecognitionMetadata {
                    interaction_type: "DICTATION",
                    recording_device_type: "OTHER_INDOOR_DEVICE",
                },
            },
            audio: RecognitionAudio {
                content: BASE64.encode(mono_pcm),
            },
        }
    }
}

/// Join the first alternative of each result with newlines.
fn collect_transcript(response: RecognizeResponse) -> String {
    response
        .results
        .into_iter()
        .filter_map(|result| result.alternatives.into_iter().next())
        .map(|alternative| alternative.transcript)
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Transcriber for GoogleSpeechClient {
    async fn transcribe(&self, mono_pcm: &[u8], sample_rate: u32) -> Result<String, VoiceError> {
        let body = self.request_body(mono_pcm, sample_rate);

        let res = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "speech API error {}: {}",
                status, body
            )));
        }

        let parsed: RecognizeResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(format!("response parse failed: {}", e)))?;

        let transcript = collect_transcript(parsed);
        debug!(
            audio_bytes = mono_pcm.len(),
            transcript_chars = transcript.chars().count(),
            "Speech recognized"
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn parse(json: &str) -> String {
        collect_transcript(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_first_alternatives_are_joined() {
        let json = r#"{
            "results": [
                {"alternatives": [{"transcript": "おはよう", "confidence": 0.9}, {"transcript": "おはよ"}]},
                {"alternatives": [{"transcript": "元気？"}]}
            ]
        }"#;
        assert_eq!(parse(json), "おはよう\n元気？");
    }

    #[test]
    fn test_missing_results_is_empty_transcript() {
        assert_eq!(parse("{}"), "");
        assert_eq!(parse(r#"{"results": [{"alternatives": []}]}"#), "");
    }

    #[test]
    fn test_request_body_uses_linear16_and_base64() {
        let client = GoogleSpeechClient::new(AppConfig::default().transcription).unwrap();
        let body = serde_json::to_value(client.request_body(&[1, 0, 2, 0], 48_000)).unwrap();

        assert_eq!(body["config"]["encoding"], "LINEAR16");
        assert_eq!(body["config"]["sampleRateHertz"], 48_000);
        assert_eq!(body["config"]["languageCode"], "ja-JP");
        assert_eq!(body["config"]["enableAutomaticPunctuation"], true);
        assert_eq!(body["config"]["metadata"]["interactionType"], "DICTATION");
        assert_eq!(body["audio"]["content"], "AQACAA==");
    }
}

//! # External Speech and Language Services
//!
//! The pipeline talks to three collaborators through narrow async traits so the
//! orchestrator never knows which vendor is behind them:
//!
//! - **Transcriber**: mono 16-bit PCM → transcript text
//! - **ResponseGenerator**: system instructions + prior context + new utterance → reply text
//! - **SpeechSynthesizer**: reply text → playable WAV audio
//!
//! ## Production implementations:
//! - `speech::GoogleSpeechClient`: Google Cloud Speech-to-Text `speech:recognize`
//! - `gemini::GeminiClient`: Gemini `generateContent`
//! - `synthesis::StyleBertVits2Client`: Style-Bert-VITS2 compatible `/voice` server

pub mod gemini;
pub mod speech;
pub mod synthesis;

use crate::error::VoiceError;
use async_trait::async_trait;
use std::time::Duration;

pub use gemini::GeminiClient;
pub use speech::GoogleSpeechClient;
pub use synthesis::StyleBertVits2Client;

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe mono s16le PCM captured at `sample_rate`.
    ///
    /// An empty string is a valid result (silence, noise, unintelligible speech).
    async fn transcribe(&self, mono_pcm: &[u8], sample_rate: u32) -> Result<String, VoiceError>;
}

/// Language-response collaborator.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, VoiceError>;
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, VoiceError>;
}

/// Everything the generator needs for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Persona instructions, already filled in with the participant's display name
    pub system_instruction: String,

    /// Rendered prior turns (`User: ...` / `Assistant: ...` lines), possibly empty
    pub context: String,

    /// What the participant just said
    pub user_text: String,

    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Flatten the request into a single prompt:
    /// system instructions, a blank line, prior turns, then the new user turn.
    pub fn prompt_text(&self) -> String {
        format!(
            "{}\n\n{}User: {}",
            self.system_instruction.trim(),
            self.context,
            self.user_text
        )
    }
}

/// Synthesized reply audio, ready to hand to an audio sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Complete container bytes (WAV)
    pub bytes: Vec<u8>,

    /// MIME type of `bytes`
    pub content_type: String,

    /// Playback length decoded from the container header
    pub duration: Duration,
}

impl SynthesizedAudio {
    pub fn wav(bytes: Vec<u8>, duration: Duration) -> Self {
        Self {
            bytes,
            content_type: "audio/wav".to_string(),
            duration,
        }
    }
}

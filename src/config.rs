//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and key)
//! - Deployment-style variables (HOST, PORT, GEMINI_API_KEY, ...)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, GEMINI_API_KEY, GOOGLE_SPEECH_API_KEY, TTS_BASE_URL)
//! 2. Environment variables (APP_SERVER__PORT, APP_GENERATION__MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each external collaborator (speech-to-text, language model, speech synthesis)
/// gets its own section so endpoints and credentials can be swapped independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub conversation: ConversationConfig,
    pub session: SessionConfig,
    pub transcription: TranscriptionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Incoming audio and utterance segmentation settings.
///
/// ## Fields:
/// - `codec`: How binary frames are decoded: `"opus"` or `"pcm"` (default). Voice-chat
///   relays send Opus, so those deployments need a `cargo build --features opus` binary
///   and `APP_AUDIO__CODEC=opus`
/// - `sample_rate` / `channels`: Format of the decoded PCM (48kHz stereo for voice chat Opus)
/// - `silence_duration_ms`: Silence after the last real frame that ends an utterance
/// - `max_utterance_frames`: Frame-count ceiling that forces an utterance out early
/// - `silence_poll_interval_ms`: How often a session checks for end-of-speech
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub silence_duration_ms: u64,
    pub max_utterance_frames: usize,
    pub silence_poll_interval_ms: u64,
}

/// Conversation history limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Messages kept per participant (user and assistant turns both count)
    pub max_messages: usize,
}

/// Per-session concurrency settings.
///
/// ## Fields:
/// - `max_skip_count`: Rejected utterances tolerated while busy before the gate self-heals
/// - `max_concurrent_sessions`: Upper bound on simultaneously connected voice sessions
/// - `heartbeat_timeout_secs`: Close a WebSocket that has been silent (no ping/pong) this long
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_skip_count: u32,
    pub max_concurrent_sessions: usize,
    pub heartbeat_timeout_secs: u64,
}

/// Speech-to-text service (Google Cloud Speech `speech:recognize` REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub language_code: String,
    pub model: String,
    pub use_enhanced: bool,
    pub enable_automatic_punctuation: bool,
    pub timeout_secs: u64,
}

/// Response generation service (Gemini `generateContent` REST API).
///
/// `system_template` may contain `{persona}` and `{participant}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub persona_name: String,
    pub system_template: String,
    pub timeout_secs: u64,
}

/// Speech synthesis service (Style-Bert-VITS2 compatible `/voice` endpoint).
///
/// The voice style is fixed per deployment; every reply is rendered with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub model_id: u32,
    pub speaker_id: u32,
    pub sdp_ratio: f32,
    pub noise: f32,
    pub noisew: f32,
    pub length: f32,
    pub language: String,
    pub style: String,
    pub style_weight: f32,
    pub auto_split: bool,
    pub split_interval: f32,
    pub timeout_secs: u64,
}

const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a bright, cheerful companion named \"{persona}\". \
The person you are talking with is \"{participant}\". \
Keep replies short and conversational rather than explanatory, but always stay warm and kind. \
Avoid line breaks. Do not use emoticons or emoji.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                codec: "pcm".to_string(),
                sample_rate: 48_000,
                channels: 2,
                silence_duration_ms: 1000,
                max_utterance_frames: 1500,  // 30s of 20ms frames
                silence_poll_interval_ms: 100,
            },
            conversation: ConversationConfig {
                max_messages: 10,
            },
            session: SessionConfig {
                max_skip_count: 10,
                max_concurrent_sessions: 10,
                heartbeat_timeout_secs: 60,
            },
            transcription: TranscriptionConfig {
                endpoint: "https://speech.googleapis.com/v1/speech:recognize".to_string(),
                api_key: String::new(),
                language_code: "ja-JP".to_string(),
                model: "default".to_string(),
                use_enhanced: true,
                enable_automatic_punctuation: true,
                timeout_secs: 30,
            },
            generation: GenerationConfig {
                endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                api_key: String::new(),
                model: "gemini-1.5-flash".to_string(),
                temperature: 0.7,
                max_tokens: 2048,
                persona_name: "Pipi".to_string(),
                system_template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
                timeout_secs: 60,
            },
            synthesis: SynthesisConfig {
                base_url: "http://127.0.0.1:5000".to_string(),
                model_id: 0,
                speaker_id: 0,
                sdp_ratio: 0.2,
                noise: 0.6,
                noisew: 0.8,
                length: 1.0,
                language: "JP".to_string(),
                style: "02".to_string(),
                style_weight: 1.0,
                auto_split: true,
                split_interval: 0.05,
                timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_AUDIO__CODEC=opus`: Decode incoming frames as Opus
    /// - `APP_GENERATION__PERSONA_NAME=Herta`: Rename the persona
    /// - `GEMINI_API_KEY=...`: Credential for response generation
    /// - `GOOGLE_SPEECH_API_KEY=...`: Credential for transcription
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Variables commonly injected by deployment platforms and secret managers
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("GEMINI_API_KEY", "generation.api_key"),
            ("GOOGLE_SPEECH_API_KEY", "transcription.api_key"),
            ("TTS_BASE_URL", "synthesis.base_url"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero silence window or a zero skip ceiling would make the pipeline
    /// either flush on every frame or never recover from a stuck session.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        match self.audio.codec.as_str() {
            "pcm" => {}
            "opus" => {
                if !cfg!(feature = "opus") {
                    return Err(anyhow::anyhow!(
                        "audio.codec is \"opus\" but the binary was built without the `opus` feature"
                    ));
                }
            }
            other => return Err(anyhow::anyhow!("Unsupported audio codec: {}", other)),
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if !(1..=2).contains(&self.audio.channels) {
            return Err(anyhow::anyhow!("Audio channels must be 1 or 2"));
        }

        if self.audio.silence_duration_ms == 0 {
            return Err(anyhow::anyhow!("Silence duration must be greater than 0"));
        }

        if self.audio.max_utterance_frames == 0 {
            return Err(anyhow::anyhow!("Max utterance frames must be greater than 0"));
        }

        if self.audio.silence_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Silence poll interval must be greater than 0"));
        }

        if self.conversation.max_messages == 0 {
            return Err(anyhow::anyhow!("Conversation max messages must be greater than 0"));
        }

        if self.session.max_skip_count == 0 {
            return Err(anyhow::anyhow!("Max skip count must be greater than 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(anyhow::anyhow!("Generation temperature must be within 0.0..=2.0"));
        }

        if self.generation.max_tokens == 0 {
            return Err(anyhow::anyhow!("Generation max tokens must be greater than 0"));
        }

        Ok(())
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.audio.silence_duration_ms)
    }

    pub fn silence_poll_interval(&self) -> Duration {
        Duration::from_millis(self.audio.silence_poll_interval_ms)
    }

    /// Copy of the configuration with credentials blanked out, safe to return over HTTP.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.transcription.api_key = redact(&config.transcription.api_key);
        config.generation.api_key = redact(&config.generation.api_key);
        config
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

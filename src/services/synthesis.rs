//! # Style-Bert-VITS2 Speech Synthesizer
//!
//! Renders reply text with a fixed voice style through a Style-Bert-VITS2
//! compatible `GET/POST {base_url}/voice` endpoint. Every parameter travels in the
//! query string; the response body is a complete WAV file.
//!
//! ## Validation:
//! The returned bytes are parsed before they are handed to playback. A body that
//! is not a readable WAV (HTML error page, truncated download) is a synthesis
//! failure rather than something the client gets to choke on.

use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::services::{SpeechSynthesizer, SynthesizedAudio};
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

pub struct StyleBertVits2Client {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl StyleBertVits2Client {
    pub fn new(config: SynthesisConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn query(&self, text: &str) -> Vec<(&'static str, String)> {
        let c = &self.config;
        vec![
            ("text", text.to_string()),
            ("model_id", c.model_id.to_string()),
            ("speaker_id", c.speaker_id.to_string()),
            ("sdp_ratio", c.sdp_ratio.to_string()),
            ("noise", c.noise.to_string()),
            ("noisew", c.noisew.to_string()),
            ("length", c.length.to_string()),
            ("language", c.language.clone()),
            ("style", c.style.clone()),
            ("style_weight", c.style_weight.to_string()),
            ("auto_split", c.auto_split.to_string()),
            ("split_interval", c.split_interval.to_string()),
        ]
    }
}

/// Parse a WAV body and compute how long it plays.
pub fn wav_duration(bytes: &[u8]) -> Result<Duration, VoiceError> {
    let (header, data) = wav::read(&mut Cursor::new(bytes))
        .map_err(|e| VoiceError::Synthesis(format!("invalid WAV returned: {}", e)))?;

    let samples = match data {
        wav::BitDepth::Eight(samples) => samples.len(),
        wav::BitDepth::Sixteen(samples) => samples.len(),
        wav::BitDepth::TwentyFour(samples) => samples.len(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples.len(),
        _ => 0,
    };

    if header.channel_count == 0 || header.sampling_rate == 0 {
        return Err(VoiceError::Synthesis(
            "WAV header has no channels or sample rate".to_string(),
        ));
    }

    let frames = samples / header.channel_count as usize;
    Ok(Duration::from_secs_f64(frames as f64 / header.sampling_rate as f64))
}

#[async_trait]
impl SpeechSynthesizer for StyleBertVits2Client {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, VoiceError> {
        let url = format!("{}/voice", self.config.base_url.trim_end_matches('/'));

        let res = self
            .client
            .post(&url)
            .header("accept", "audio/wav")
            .query(&self.query(text))
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("TTS server error {}: {}", status, body)));
        }

        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio body: {}", e)))?
            .to_vec();

        let duration = wav_duration(&bytes)?;
        debug!(
            audio_bytes = bytes.len(),
            duration_ms = duration.as_millis() as u64,
            "Speech synthesized"
        );

        Ok(SynthesizedAudio::wav(bytes, duration))
    }
}

//! # Utterance Pipeline
//!
//! Turns one admitted utterance into a spoken reply.
//!
//! ## Stages (strictly sequential, no retries):
//! 1. **Downmix**: stereo PCM → mono
//! 2. **Transcribe**: mono PCM → text
//! 3. **Generate**: persona + prior turns + new text → reply text (history is written here)
//! 4. **Synthesize**: reply text → WAV
//! 5. **Play**: hand the WAV to the session's audio sink
//!
//! The orchestrator runs stages 1-4 and reports a [`PipelineOutcome`]. It never
//! touches the session gate: the session that admitted the utterance owns the
//! gate and releases it based on the outcome (immediately for a drop, after the
//! playback terminal event for a reply).

pub mod orchestrator;
pub mod playback;

#[cfg(test)]
pub mod testing;

use crate::error::VoiceError;
use crate::services::SynthesizedAudio;
use serde::{Deserialize, Serialize};

pub use orchestrator::Orchestrator;
pub use playback::{AudioSink, PlaybackController, PlaybackEvent, PlaybackTerminal};

/// The person speaking in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity; conversation history is keyed by it
    pub id: String,

    /// Name used when addressing the participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.filter(|name| !name.trim().is_empty()),
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// A finished reply, ready to play.
#[derive(Debug, Clone)]
pub struct Reply {
    pub transcript: String,
    pub reply_text: String,
    pub audio: SynthesizedAudio,
}

/// Why a pipeline run ended without a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Nothing left after downmixing
    EmptyAudio,
    /// Transcription produced no text
    EmptyTranscript,
    /// A collaborator failed
    Failed(VoiceError),
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::EmptyAudio => "empty_audio",
            DropReason::EmptyTranscript => "empty_transcript",
            DropReason::Failed(err) => err.stage(),
        }
    }
}

/// Result of running one utterance through the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Reply(Reply),
    Dropped(DropReason),
}

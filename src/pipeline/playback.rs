//! # Playback Controller
//!
//! Owns the session's single audio sink and tracks which reply is playing.
//!
//! ## Lifecycle:
//! 1. `play()` mints a fresh [`PlaybackId`](uuid::Uuid), replaces any previous
//!    subscription and attaches the audio to the sink
//! 2. The sink (the client, for WebSocket sessions) reports `Idle` or `Error`
//!    tagged with that id
//! 3. `observe()` turns the first event for the active id into a
//!    [`PlaybackTerminal`]; the session releases its gate on it
//!
//! Events carrying any other id belong to a replaced subscription and are
//! ignored, so a late `Idle` can never release a gate that a newer turn holds.

use crate::error::VoiceError;
use crate::services::SynthesizedAudio;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Somewhere synthesized audio can be played.
///
/// A sink plays one resource at a time. Implementations deliver the lifecycle
/// events back to the session asynchronously.
pub trait AudioSink {
    fn attach(&mut self, playback_id: Uuid, audio: SynthesizedAudio) -> Result<(), VoiceError>;
}

/// Lifecycle event reported by a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The resource finished playing
    Idle,
    /// The sink failed while playing
    Error(String),
}

/// How the active playback ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackTerminal {
    Finished { playback_id: Uuid },
    Failed { playback_id: Uuid, message: String },
}

impl PlaybackTerminal {
    pub fn playback_id(&self) -> Uuid {
        match self {
            PlaybackTerminal::Finished { playback_id } => *playback_id,
            PlaybackTerminal::Failed { playback_id, .. } => *playback_id,
        }
    }
}

pub struct PlaybackController<S: AudioSink> {
    sink: S,
    active: Option<Uuid>,
}

impl<S: AudioSink> PlaybackController<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, active: None }
    }

    /// Attach `audio` to the sink under a new playback id.
    ///
    /// On error nothing is active afterwards and the caller must release its gate.
    pub fn play(&mut self, audio: SynthesizedAudio) -> Result<Uuid, VoiceError> {
        let playback_id = Uuid::new_v4();

        if let Some(previous) = self.active.replace(playback_id) {
            debug!(%previous, "Replacing previous playback subscription");
        }

        if let Err(err) = self.sink.attach(playback_id, audio) {
            self.active = None;
            warn!(%playback_id, error = %err, "Failed to attach audio to sink");
            return Err(err);
        }

        debug!(%playback_id, "Playback started");
        Ok(playback_id)
    }

    /// Feed a sink event. Returns the terminal result at most once per playback.
    pub fn observe(&mut self, playback_id: Uuid, event: PlaybackEvent) -> Option<PlaybackTerminal> {
        if self.active != Some(playback_id) {
            debug!(%playback_id, ?event, "Ignoring event for stale playback");
            return None;
        }
        self.active = None;

        match event {
            PlaybackEvent::Idle => {
                info!(%playback_id, "Playback finished");
                Some(PlaybackTerminal::Finished { playback_id })
            }
            PlaybackEvent::Error(message) => {
                warn!(%playback_id, error = %message, "Playback failed");
                Some(PlaybackTerminal::Failed { playback_id, message })
            }
        }
    }

    /// Forget the active subscription without waiting for its events.
    pub fn cancel(&mut self) -> Option<Uuid> {
        self.active.take()
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

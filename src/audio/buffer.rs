//! # Utterance Buffer
//!
//! Accumulates decoded PCM for one listening session and decides when an utterance
//! is over.
//!
//! ## End-of-speech triggers:
//! - **Silence**: no real (non-marker) frame has arrived for `silence_duration`
//! - **Frame ceiling**: the accumulator holds `max_frames` decoded frames, which
//!   bounds memory for someone who never stops talking
//!
//! Either trigger hands the accumulated PCM out as an [`Utterance`] and resets the
//! buffer. An empty accumulator produces nothing, so silence alone never reaches
//! the pipeline.
//!
//! Time is passed in by the caller rather than read from the clock, which keeps
//! the segmentation logic deterministic under test.

use crate::audio::codec::{is_silence_frame, CodecNormalizer};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Segmentation settings for one buffer.
#[derive(Debug, Clone)]
pub struct UtteranceBufferConfig {
    /// Silence after the last real frame that ends an utterance
    pub silence_duration: Duration,

    /// Decoded frame count that forces an utterance out
    pub max_frames: usize,
}

impl Default for UtteranceBufferConfig {
    fn default() -> Self {
        Self {
            silence_duration: Duration::from_millis(1000),
            max_frames: 1500,
        }
    }
}

/// Why an utterance was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Silence sustained for the configured duration
    Silence,
    /// The frame-count ceiling was reached
    FrameCeiling,
    /// The session asked for it (client ended the stream)
    Forced,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Silence => "silence",
            FlushReason::FrameCeiling => "frame_ceiling",
            FlushReason::Forced => "forced",
        }
    }
}

/// One contiguous span of captured speech, ready for the pipeline.
///
/// Ownership moves into the pipeline run that processes it; the PCM is dropped
/// when that run finishes.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Interleaved s16le PCM, a whole number of sample blocks
    pub pcm: Vec<u8>,

    /// Channel count of `pcm`
    pub channels: u16,

    /// Sample rate of `pcm` in Hz
    pub sample_rate: u32,

    /// Number of decoded frames that went into this utterance
    pub frame_count: usize,

    /// What ended the utterance
    pub reason: FlushReason,
}

impl Utterance {
    /// Duration of the captured audio.
    pub fn duration(&self) -> Duration {
        let block = self.channels as usize * 2;
        if block == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = (self.pcm.len() / block) as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

/// Frame accumulator for one listening session.
pub struct UtteranceBuffer {
    codec: CodecNormalizer,
    config: UtteranceBufferConfig,
    pcm: Vec<u8>,
    frame_count: usize,
    last_voice_at: Option<Instant>,
    decode_failures: u64,
}

impl UtteranceBuffer {
    pub fn new(codec: CodecNormalizer, config: UtteranceBufferConfig) -> Self {
        Self {
            codec,
            config,
            pcm: Vec::new(),
            frame_count: 0,
            last_voice_at: None,
            decode_failures: 0,
        }
    }

    /// Feed one raw frame, received at `now`.
    ///
    /// ## Behaviour:
    /// 1. Silence marker frames are dropped without touching the silence timer
    /// 2. Any other frame restarts the silence timer, even if it fails to decode
    /// 3. Decoded PCM is appended, truncated to whole sample blocks
    /// 4. Reaching the frame ceiling flushes immediately
    pub fn on_frame(&mut self, frame: &[u8], now: Instant) -> Option<Utterance> {
        if is_silence_frame(frame) {
            debug!("Skipping silence marker frame");
            return None;
        }

        self.last_voice_at = Some(now);

        match self.codec.decode_frame(frame) {
            Ok(decoded) => {
                let block = self.codec.block_align();
                let usable = decoded.len() - decoded.len() % block;
                self.pcm.extend_from_slice(&decoded[..usable]);
                self.frame_count += 1;
            }
            Err(err) => {
                self.decode_failures += 1;
                warn!(error = %err, frame_len = frame.len(), "Dropping undecodable frame");
                return None;
            }
        }

        if self.frame_count >= self.config.max_frames {
            debug!(frames = self.frame_count, "Frame ceiling reached, cutting utterance");
            return self.take(FlushReason::FrameCeiling);
        }

        None
    }

    /// Check the silence timer at `now`.
    ///
    /// Fires once per utterance: after a flush the timer is cleared until the
    /// next real frame arrives.
    pub fn poll_end_of_speech(&mut self, now: Instant) -> Option<Utterance> {
        let last = self.last_voice_at?;
        if now.saturating_duration_since(last) < self.config.silence_duration {
            return None;
        }
        self.last_voice_at = None;
        self.take(FlushReason::Silence)
    }

    /// Force end-of-speech regardless of timing.
    pub fn flush(&mut self) -> Option<Utterance> {
        self.last_voice_at = None;
        self.take(FlushReason::Forced)
    }

    /// Bytes of PCM currently held.
    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    fn take(&mut self, reason: FlushReason) -> Option<Utterance> {
        let frame_count = std::mem::take(&mut self.frame_count);
        let pcm = std::mem::take(&mut self.pcm);
        self.last_voice_at = None;

        if pcm.is_empty() {
            debug!(reason = reason.as_str(), "End of speech with no audio, nothing to do");
            return None;
        }

        Some(Utterance {
            pcm,
            channels: self.codec.channels(),
            sample_rate: self.codec.sample_rate(),
            frame_count,
            reason,
        })
    }
}

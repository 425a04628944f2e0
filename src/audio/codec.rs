//! # Codec Normalization
//!
//! Turns compressed voice frames into linear PCM and collapses stereo to mono for
//! the transcription service.
//!
//! ## PCM layout:
//! - **Encoding**: signed 16-bit little-endian integers
//! - **Interleaving**: `L R L R ...` for stereo
//! - **Block alignment**: a buffer is always a whole number of `channels × 2` byte blocks
//!
//! ## Decoders:
//! - **OpusFrameDecoder** (`opus` feature): one libopus decoder per session, 48kHz stereo
//! - **RawPcmDecoder**: frames are already interleaved PCM, only alignment is checked
//!
//! Clients that relay voice-chat audio send Opus packets, so those deployments
//! must build with `--features opus` and set `audio.codec = "opus"`. The default
//! build only understands raw PCM.

use crate::error::VoiceError;
use byteorder::{ByteOrder, LittleEndian};

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Silence marker frames are exactly this long...
const SILENCE_FRAME_LEN: usize = 3;
/// ...and start with this byte.
const SILENCE_FRAME_MARKER: u8 = 0xF8;

/// Returns true for the 3-byte comfort-noise marker that voice transports send
/// between bursts of speech. These frames carry no audio and are never decoded.
pub fn is_silence_frame(frame: &[u8]) -> bool {
    frame.len() == SILENCE_FRAME_LEN && frame[0] == SILENCE_FRAME_MARKER
}

/// Decodes one compressed frame into interleaved s16le PCM.
///
/// Implementations may keep decoder state between frames (Opus does), which is
/// why decoding takes `&mut self` and one decoder belongs to exactly one session.
pub trait FrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, VoiceError>;

    /// Number of interleaved channels in the decoded output.
    fn channels(&self) -> u16;

    /// Sample rate of the decoded output in Hz.
    fn sample_rate(&self) -> u32;
}

/// Accepts frames that already contain interleaved s16le PCM.
///
/// Used by clients that do their own decoding, and by tests.
#[derive(Debug, Clone)]
pub struct RawPcmDecoder {
    sample_rate: u32,
    channels: u16,
}

impl RawPcmDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

impl FrameDecoder for RawPcmDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let block = self.channels as usize * BYTES_PER_SAMPLE;
        if frame.len() < block {
            return Err(VoiceError::Decode(format!(
                "PCM frame of {} bytes is shorter than one {}-byte sample block",
                frame.len(),
                block
            )));
        }
        let usable = frame.len() - frame.len() % block;
        Ok(frame[..usable].to_vec())
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// libopus-backed decoder.
#[cfg(feature = "opus")]
pub struct OpusFrameDecoder {
    decoder: opus::Decoder,
    sample_rate: u32,
    channels: u16,
}

/// 120ms at 48kHz, the longest frame Opus can produce.
#[cfg(feature = "opus")]
const MAX_OPUS_FRAME_SAMPLES: usize = 5760;

#[cfg(feature = "opus")]
impl OpusFrameDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, VoiceError> {
        let layout = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            other => {
                return Err(VoiceError::Decode(format!(
                    "Opus supports 1 or 2 channels, not {}",
                    other
                )))
            }
        };
        let decoder = opus::Decoder::new(sample_rate, layout)
            .map_err(|e| VoiceError::Decode(format!("failed to create Opus decoder: {}", e)))?;
        Ok(Self { decoder, sample_rate, channels })
    }
}

#[cfg(feature = "opus")]
impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let channels = self.channels as usize;
        let mut samples = vec![0i16; MAX_OPUS_FRAME_SAMPLES * channels];
        let per_channel = self
            .decoder
            .decode(frame, &mut samples, false)
            .map_err(|e| VoiceError::Decode(e.to_string()))?;
        samples.truncate(per_channel * channels);

        let mut pcm = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
        LittleEndian::write_i16_into(&samples, &mut pcm);
        Ok(pcm)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Builds the decoder named by `audio.codec`.
pub fn decoder_for(codec: &str, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameDecoder>, VoiceError> {
    match codec {
        "pcm" => Ok(Box::new(RawPcmDecoder::new(sample_rate, channels))),
        #[cfg(feature = "opus")]
        "opus" => Ok(Box::new(OpusFrameDecoder::new(sample_rate, channels)?)),
        other => Err(VoiceError::Decode(format!("codec \"{}\" is not available in this build", other))),
    }
}

/// Per-session codec normalizer: owns the frame decoder and knows the PCM layout
/// it produces.
pub struct CodecNormalizer {
    decoder: Box<dyn FrameDecoder>,
}

impl CodecNormalizer {
    pub fn new(decoder: Box<dyn FrameDecoder>) -> Self {
        Self { decoder }
    }

    /// Decode one compressed frame into PCM.
    ///
    /// ## Errors:
    /// `VoiceError::Decode` for malformed input; the caller drops the frame and
    /// keeps accumulating the utterance.
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, VoiceError> {
        self.decoder.decode(frame)
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.sample_rate()
    }

    /// Bytes in one interleaved sample block (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.channels() as usize * BYTES_PER_SAMPLE
    }
}

/// Average paired left/right samples into a mono buffer.
///
/// ## Numeric semantics:
/// - `mono = floor((left + right) / 2)`, computed in `i32` so it cannot overflow
/// - Output length is `⌊input / 4⌋ × 2` bytes; a trailing incomplete pair is dropped
pub fn downmix_to_mono(stereo: &[u8]) -> Vec<u8> {
    stereo
        .chunks_exact(2 * BYTES_PER_SAMPLE)
        .flat_map(|pair| {
            let left = LittleEndian::read_i16(&pair[..BYTES_PER_SAMPLE]) as i32;
            let right = LittleEndian::read_i16(&pair[BYTES_PER_SAMPLE..]) as i32;
            ((left + right).div_euclid(2) as i16).to_le_bytes()
        })
        .collect()
}

/// Normalize an utterance to mono regardless of its channel count.
pub fn to_mono(pcm: &[u8], channels: u16) -> Vec<u8> {
    match channels {
        2 => downmix_to_mono(pcm),
        _ => pcm[..pcm.len() - pcm.len() % BYTES_PER_SAMPLE].to_vec(),
    }
}

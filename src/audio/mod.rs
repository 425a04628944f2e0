//! # Audio Processing Module
//!
//! Everything between a raw voice frame and a finished utterance.
//!
//! ## Key Components:
//! - **Codec Normalizer**: frame decoding (Opus or raw PCM) and stereo → mono downmix
//! - **Utterance Buffer**: per-session accumulator with silence and size cut-offs
//!
//! ## Audio Format:
//! - **Sample Rate**: 48kHz (voice chat Opus native rate)
//! - **Bit Depth**: 16-bit PCM, little-endian signed integers
//! - **Channels**: decoded as stereo, sent to transcription as mono

pub mod buffer;   // Utterance segmentation
pub mod codec;    // Frame decoding and downmix

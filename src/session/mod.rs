//! # Voice Session Management
//!
//! ## Key Components:
//! - **Session Gate**: single-flight admission with a bounded skip counter
//! - **Voice Session**: per-connection buffer, gate and playback, driven by one actor
//! - **Session Manager**: registry of live sessions with a concurrency limit

pub mod gate;
pub mod manager;
pub mod voice;

pub use gate::{GateState, SessionGate};
pub use manager::{SessionInfo, SessionManager, SessionPhase};
pub use voice::{Admission, SessionStats, Turn, TurnStatus, VoiceSession};

//! # Session Gate
//!
//! Single-flight admission control for one voice session.
//!
//! ## State machine:
//! ```text
//!            try_enter() -> true
//!   Idle  ───────────────────────▶  Busy
//!    ▲                               │  try_enter() -> false, skip += 1
//!    │            exit()             │
//!    └───────────────────────────────┘
//!    └── skip reaches max: forced reset (still rejects that attempt)
//! ```
//!
//! ## Invariants:
//! - Every successful `try_enter()` is matched by exactly one `exit()`
//! - The skip counter is zero whenever the gate is `Idle`
//! - After `max_skip_count` consecutive rejections the gate self-heals, so a
//!   collaborator call that never resolves cannot wedge the session forever

use tracing::{debug, warn};

/// Default number of rejected attempts tolerated before the gate resets itself.
pub const DEFAULT_MAX_SKIP_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::Busy => "busy",
        }
    }
}

#[derive(Debug)]
pub struct SessionGate {
    state: GateState,
    skip_count: u32,
    max_skip_count: u32,
    forced_resets: u64,
}

impl SessionGate {
    pub fn new(max_skip_count: u32) -> Self {
        Self {
            state: GateState::Idle,
            skip_count: 0,
            max_skip_count: max_skip_count.max(1),
            forced_resets: 0,
        }
    }

    /// Try to start processing an utterance.
    ///
    /// Returns `true` when the caller now owns the session and must eventually call
    /// [`SessionGate::exit`]. Returns `false` when another utterance is in flight;
    /// the attempt is counted and dropped, never queued.
    pub fn try_enter(&mut self) -> bool {
        match self.state {
            GateState::Idle => {
                self.state = GateState::Busy;
                true
            }
            GateState::Busy => {
                self.skip_count += 1;
                debug!(skip_count = self.skip_count, "Session busy, skipping utterance");

                if self.skip_count >= self.max_skip_count {
                    warn!(
                        skip_count = self.skip_count,
                        "Skip limit reached, forcing session gate back to idle"
                    );
                    self.state = GateState::Idle;
                    self.skip_count = 0;
                    self.forced_resets += 1;
                }
                false
            }
        }
    }

    /// Finish the in-flight utterance.
    pub fn exit(&mut self) {
        if self.state == GateState::Idle {
            debug!("Gate exit while already idle");
        }
        self.state = GateState::Idle;
        self.skip_count = 0;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state == GateState::Busy
    }

    pub fn skip_count(&self) -> u32 {
        self.skip_count
    }

    pub fn max_skip_count(&self) -> u32 {
        self.max_skip_count
    }

    /// How many times the skip limit has forced the gate open.
    pub fn forced_resets(&self) -> u64 {
        self.forced_resets
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SKIP_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_exit() {
        let mut gate = SessionGate::default();
        assert!(gate.try_enter());
        assert!(gate.is_busy());
        gate.exit();
        assert_eq!(gate.state(), GateState::Idle);
        assert!(gate.try_enter());
    }

    #[test]
    fn test_second_enter_is_rejected_and_counted() {
        let mut gate = SessionGate::default();
        assert!(gate.try_enter());
        assert!(!gate.try_enter());
        assert_eq!(gate.skip_count(), 1);
        assert!(!gate.try_enter());
        assert_eq!(gate.skip_count(), 2);
        assert!(gate.is_busy());
    }

    #[test]
    fn test_exit_zeroes_skip_counter() {
        let mut gate = SessionGate::default();
        gate.try_enter();
        gate.try_enter();
        gate.try_enter();
        gate.exit();
        assert_eq!(gate.skip_count(), 0);
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_tenth_skip_resets_but_still_rejects() {
        let mut gate = SessionGate::new(10);
        assert!(gate.try_enter());

        for expected in 1..=9 {
            assert!(!gate.try_enter());
            assert_eq!(gate.skip_count(), expected);
            assert!(gate.is_busy());
        }

        assert!(!gate.try_enter(), "the 10th attempt is rejected");
        assert_eq!(gate.state(), GateState::Idle);
        assert_eq!(gate.skip_count(), 0);
        assert_eq!(gate.forced_resets(), 1);

        assert!(gate.try_enter(), "the next attempt is admitted");
    }

    #[test]
    fn test_zero_max_is_clamped() {
        let mut gate = SessionGate::new(0);
        assert_eq!(gate.max_skip_count(), 1);
        gate.try_enter();
        assert!(!gate.try_enter());
        assert!(!gate.is_busy());
    }
}

//! # Voice Session
//!
//! Per-connection state for one speaking participant: the utterance buffer (and
//! the codec inside it), the single-flight gate, and the playback controller.
//!
//! ## Turn flow:
//! ```text
//! frames ─▶ buffer ─(end of speech)─▶ admit ─▶ Turn ──▶ orchestrator (async)
//!                                       │                     │
//!                                       └─ Rejected (skip)    ▼
//!                                                     complete(turn, outcome)
//!                                                       │              │
//!                                            Dropped: release   Reply: play
//!                                                                      │
//!                                                   on_playback_event(Idle|Error)
//!                                                                      │
//!                                                                   release
//! ```
//!
//! ## Staleness:
//! A forced gate reset abandons the in-flight turn. Each admitted turn carries a
//! monotonically increasing id, and completions for anything but the active turn
//! are ignored, so an abandoned turn that finally resolves cannot release the gate
//! out from under its successor or start playing over it.
//!
//! The session is owned by exactly one actor and is never shared across threads.

use crate::audio::buffer::{Utterance, UtteranceBuffer};
use crate::conversation::ConversationHistory;
use crate::pipeline::{
    AudioSink, DropReason, Participant, PipelineOutcome, PlaybackController, PlaybackEvent,
    PlaybackTerminal,
};
use crate::session::gate::{GateState, SessionGate};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An utterance that won admission, tagged with its turn id.
#[derive(Debug)]
pub struct Turn {
    pub id: u64,
    pub utterance: Utterance,
}

/// Result of offering an utterance to the gate.
#[derive(Debug)]
pub enum Admission {
    Admitted(Turn),
    Rejected {
        /// Consecutive rejections so far (equals the limit on the resetting attempt)
        skip_count: u32,
        /// The gate was forced back to idle by this rejection
        gate_reset: bool,
    },
}

/// What the session did with a finished pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// The reply is attached to the sink; the gate stays busy until playback ends
    Playing {
        playback_id: Uuid,
        transcript: String,
        reply_text: String,
        content_type: String,
        duration: Duration,
    },
    /// The turn ended without playback and the gate was released
    Released(DropReason),
    /// The turn was abandoned earlier; its result is discarded
    Stale,
}

/// Counters reported in the session listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub utterances_admitted: u64,
    pub utterances_skipped: u64,
    pub replies_played: u64,
    pub turns_dropped: u64,
    pub gate_resets: u64,
    pub decode_failures: u64,
}

pub struct VoiceSession<S: AudioSink> {
    session_id: String,
    participant: Participant,
    buffer: UtteranceBuffer,
    gate: SessionGate,
    playback: PlaybackController<S>,
    history: Arc<ConversationHistory>,
    next_turn: u64,
    active_turn: Option<u64>,
    stats: SessionStats,
}

impl<S: AudioSink> VoiceSession<S> {
    pub fn new(
        session_id: impl Into<String>,
        participant: Participant,
        buffer: UtteranceBuffer,
        max_skip_count: u32,
        sink: S,
        history: Arc<ConversationHistory>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant,
            buffer,
            gate: SessionGate::new(max_skip_count),
            playback: PlaybackController::new(sink),
            history,
            next_turn: 0,
            active_turn: None,
            stats: SessionStats::default(),
        }
    }

    /// Feed one raw audio frame. Returns an admission decision when the frame
    /// completed an utterance.
    pub fn on_frame(&mut self, frame: &[u8], now: Instant) -> Option<Admission> {
        let utterance = self.buffer.on_frame(frame, now);
        self.stats.decode_failures = self.buffer.decode_failures();
        Some(self.admit(utterance?))
    }

    /// Check for end-of-speech by silence.
    pub fn poll_end_of_speech(&mut self, now: Instant) -> Option<Admission> {
        let utterance = self.buffer.poll_end_of_speech(now)?;
        Some(self.admit(utterance))
    }

    /// Cut whatever is buffered into an utterance now.
    pub fn flush(&mut self) -> Option<Admission> {
        let utterance = self.buffer.flush()?;
        Some(self.admit(utterance))
    }

    /// Offer an utterance to the gate. Rejected utterances are dropped, never queued.
    pub fn admit(&mut self, utterance: Utterance) -> Admission {
        let resets_before = self.gate.forced_resets();

        if self.gate.try_enter() {
            self.next_turn += 1;
            self.active_turn = Some(self.next_turn);
            self.stats.utterances_admitted += 1;
            debug!(
                session_id = %self.session_id,
                turn = self.next_turn,
                frames = utterance.frame_count,
                duration_ms = utterance.duration().as_millis() as u64,
                reason = utterance.reason.as_str(),
                "Utterance admitted"
            );
            return Admission::Admitted(Turn {
                id: self.next_turn,
                utterance,
            });
        }

        self.stats.utterances_skipped += 1;
        let gate_reset = self.gate.forced_resets() > resets_before;
        let skip_count = if gate_reset {
            self.gate.max_skip_count()
        } else {
            self.gate.skip_count()
        };

        if gate_reset {
            // The in-flight turn is abandoned along with its playback subscription
            self.stats.gate_resets += 1;
            let abandoned_turn = self.active_turn.take();
            let abandoned_playback = self.playback.cancel();
            warn!(
                session_id = %self.session_id,
                ?abandoned_turn,
                ?abandoned_playback,
                "Session gate forced idle after repeated skips"
            );
        }

        Admission::Rejected {
            skip_count,
            gate_reset,
        }
    }

    /// Apply the outcome of the pipeline run for `turn_id`.
    ///
    /// The exchange is written to conversation history only when the active turn's
    /// reply is attached to the sink, so abandoned or unplayable replies never show
    /// up in later prompts.
    pub fn complete(&mut self, turn_id: u64, outcome: PipelineOutcome) -> TurnStatus {
        if self.active_turn != Some(turn_id) {
            debug!(session_id = %self.session_id, turn = turn_id, "Discarding result of abandoned turn");
            return TurnStatus::Stale;
        }

        match outcome {
            PipelineOutcome::Dropped(reason) => {
                self.stats.turns_dropped += 1;
                self.release();
                TurnStatus::Released(reason)
            }
            PipelineOutcome::Reply(reply) => {
                let content_type = reply.audio.content_type.clone();
                let duration = reply.audio.duration;

                match self.playback.play(reply.audio) {
                    Ok(playback_id) => {
                        self.history
                            .record_exchange(&self.participant.id, reply.transcript.as_str(), reply.reply_text.as_str());
                        TurnStatus::Playing {
                            playback_id,
                            transcript: reply.transcript,
                            reply_text: reply.reply_text,
                            content_type,
                            duration,
                        }
                    }
                    Err(err) => {
                        self.stats.turns_dropped += 1;
                        self.release();
                        TurnStatus::Released(DropReason::Failed(err))
                    }
                }
            }
        }
    }

    /// Apply a sink event. Returns the terminal result when it ended the active
    /// playback, after releasing the gate.
    pub fn on_playback_event(&mut self, playback_id: Uuid, event: PlaybackEvent) -> Option<PlaybackTerminal> {
        let terminal = self.playback.observe(playback_id, event)?;

        if matches!(terminal, PlaybackTerminal::Finished { .. }) {
            self.stats.replies_played += 1;
        } else {
            self.stats.turns_dropped += 1;
        }
        self.release();
        Some(terminal)
    }

    fn release(&mut self) {
        self.gate.exit();
        self.active_turn = None;
        info!(session_id = %self.session_id, "Session idle, listening");
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn skip_count(&self) -> u32 {
        self.gate.skip_count()
    }

    pub fn active_turn(&self) -> Option<u64> {
        self.active_turn
    }

    pub fn active_playback(&self) -> Option<Uuid> {
        self.playback.active()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        self.playback.sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use crate::audio::buffer::{FlushReason, UtteranceBufferConfig};
    use crate::audio::codec::{CodecNormalizer, RawPcmDecoder};
    use crate::conversation::{Message, Role};
    use crate::pipeline::testing::{sample_audio, Call, FakeServices, RecordingSink};
    use crate::pipeline::Reply;

    const SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];
    const FRAME_MS: u64 = 20;

    fn session_with(sink: RecordingSink, history: Arc<ConversationHistory>) -> VoiceSession<RecordingSink> {
        let buffer = UtteranceBuffer::new(
            CodecNormalizer::new(Box::new(RawPcmDecoder::new(48_000, 2))),
            UtteranceBufferConfig::default(),
        );
        VoiceSession::new("s-1", Participant::new("alice", None), buffer, 10, sink, history)
    }

    fn session() -> VoiceSession<RecordingSink> {
        session_with(RecordingSink::default(), Arc::new(ConversationHistory::new(10)))
    }

    fn exchange(user: &str, assistant: &str) -> PipelineOutcome {
        PipelineOutcome::Reply(Reply {
            transcript: user.to_string(),
            reply_text: assistant.to_string(),
            audio: sample_audio(),
        })
    }

    /// 20ms of 48kHz stereo speech
    fn voice_frame() -> Vec<u8> {
        vec![0x10; 960 * 4]
    }

    fn utterance() -> Utterance {
        Utterance {
            pcm: vec![0; 16],
            channels: 2,
            sample_rate: 48_000,
            frame_count: 1,
            reason: FlushReason::Silence,
        }
    }

    fn reply() -> PipelineOutcome {
        PipelineOutcome::Reply(Reply {
            transcript: "hello".to_string(),
            reply_text: "hi!".to_string(),
            audio: sample_audio(),
        })
    }

    fn admitted(admission: Admission) -> Turn {
        match admission {
            Admission::Admitted(turn) => turn,
            other => panic!("expected admission, got {:?}", other),
        }
    }

    /// Feed `voice` speech frames then `silence_ms` of silence markers, polling as
    /// the actor would. Returns every admission produced.
    fn speak(session: &mut VoiceSession<RecordingSink>, start: Instant, voice: u64, silence_ms: u64) -> Vec<Admission> {
        let mut admissions = Vec::new();
        let mut now = start;
        for _ in 0..voice {
            admissions.extend(session.on_frame(&voice_frame(), now));
            now += Duration::from_millis(FRAME_MS);
        }
        for _ in 0..silence_ms / FRAME_MS {
            admissions.extend(session.on_frame(&SILENCE, now));
            admissions.extend(session.poll_end_of_speech(now));
            now += Duration::from_millis(FRAME_MS);
        }
        admissions.extend(session.poll_end_of_speech(now));
        admissions
    }

    #[tokio::test]
    async fn test_speech_then_silence_runs_full_pipeline_once() {
        let fakes = FakeServices::new().transcript("hello").reply("hi!");
        let orchestrator = fakes.orchestrator(10);
        let mut session = session_with(RecordingSink::default(), orchestrator.history().clone());

        let mut admissions = speak(&mut session, Instant::now(), 50, 1000);
        assert_eq!(admissions.len(), 1);
        let turn = admitted(admissions.remove(0));
        assert_eq!(turn.utterance.frame_count, 50);

        let outcome = orchestrator
            .process(session.session_id(), turn.utterance, session.participant())
            .await;
        let status = session.complete(turn.id, outcome);

        let playback_id = match status {
            TurnStatus::Playing { playback_id, .. } => playback_id,
            other => panic!("expected playback, got {:?}", other),
        };
        let calls = fakes.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], Call::Transcribe { .. }));
        assert!(matches!(calls[1], Call::Generate { .. }));
        assert!(matches!(calls[2], Call::Synthesize { .. }));
        assert_eq!(session.sink().attached(), vec![playback_id]);
        assert_eq!(session.gate_state(), GateState::Busy);
        assert_eq!(
            orchestrator.history().get_conversation("alice"),
            vec![Message::new(Role::User, "hello"), Message::new(Role::Assistant, "hi!")]
        );

        session.on_playback_event(playback_id, PlaybackEvent::Idle).unwrap();
        assert_eq!(session.gate_state(), GateState::Idle);
    }

    #[tokio::test]
    async fn test_silence_only_makes_no_calls() {
        let fakes = FakeServices::new();
        let mut session = session();

        let admissions = speak(&mut session, Instant::now(), 0, 2000);
        assert!(admissions.is_empty());
        assert!(fakes.calls().is_empty());
        assert_eq!(session.gate_state(), GateState::Idle);
        assert_eq!(session.stats().utterances_admitted, 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_releases_gate_without_side_effects() {
        let fakes = FakeServices::new().fail_transcription();
        let orchestrator = fakes.orchestrator(10);
        let mut session = session();

        let turn = admitted(session.admit(utterance()));
        assert_eq!(session.gate_state(), GateState::Busy);

        let outcome = orchestrator
            .process(session.session_id(), turn.utterance, session.participant())
            .await;
        let status = session.complete(turn.id, outcome);

        assert!(matches!(
            status,
            TurnStatus::Released(DropReason::Failed(VoiceError::Transcription(_)))
        ));
        assert_eq!(session.gate_state(), GateState::Idle);
        assert_eq!(fakes.calls().len(), 1);
        assert!(orchestrator.history().get_conversation("alice").is_empty());
        assert!(session.sink().attached().is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_utterances_skip_until_playback_ends() {
        let fakes = FakeServices::new();
        let orchestrator = fakes.orchestrator(10);
        let mut session = session();

        let first = admitted(session.admit(utterance()));
        match session.admit(utterance()) {
            Admission::Rejected { skip_count, gate_reset } => {
                assert_eq!(skip_count, 1);
                assert!(!gate_reset);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let outcome = orchestrator
            .process(session.session_id(), first.utterance, session.participant())
            .await;
        let playback_id = match session.complete(first.id, outcome) {
            TurnStatus::Playing { playback_id, .. } => playback_id,
            other => panic!("expected playback, got {:?}", other),
        };

        // Still busy while the reply plays
        assert_eq!(session.gate_state(), GateState::Busy);

        let terminal = session.on_playback_event(playback_id, PlaybackEvent::Idle);
        assert_eq!(terminal, Some(PlaybackTerminal::Finished { playback_id }));
        assert_eq!(session.gate_state(), GateState::Idle);
        assert_eq!(session.skip_count(), 0);
        assert_eq!(fakes.calls().len(), 3);
    }

    #[test]
    fn test_playback_error_releases_gate() {
        let mut session = session();
        let turn = admitted(session.admit(utterance()));
        let playback_id = match session.complete(turn.id, reply()) {
            TurnStatus::Playing { playback_id, .. } => playback_id,
            other => panic!("expected playback, got {:?}", other),
        };

        let terminal = session
            .on_playback_event(playback_id, PlaybackEvent::Error("device lost".to_string()))
            .unwrap();
        assert_eq!(
            terminal,
            PlaybackTerminal::Failed {
                playback_id,
                message: "device lost".to_string()
            }
        );
        assert_eq!(session.gate_state(), GateState::Idle);
    }

    #[test]
    fn test_stale_playback_event_is_ignored() {
        let mut session = session();
        let turn = admitted(session.admit(utterance()));
        session.complete(turn.id, reply());

        assert!(session.on_playback_event(Uuid::new_v4(), PlaybackEvent::Idle).is_none());
        assert_eq!(session.gate_state(), GateState::Busy);
    }

    #[test]
    fn test_attach_failure_releases_gate() {
        let history = Arc::new(ConversationHistory::new(10));
        let mut session = session_with(RecordingSink::failing(), history.clone());
        let turn = admitted(session.admit(utterance()));

        let status = session.complete(turn.id, reply());
        assert!(matches!(
            status,
            TurnStatus::Released(DropReason::Failed(VoiceError::Playback(_)))
        ));
        assert_eq!(session.gate_state(), GateState::Idle);
        assert!(session.active_playback().is_none());
        assert!(history.get_conversation("alice").is_empty());
    }

    #[test]
    fn test_forced_reset_makes_old_turn_stale() {
        let history = Arc::new(ConversationHistory::new(10));
        let mut session = session_with(RecordingSink::default(), history.clone());
        let stuck = admitted(session.admit(utterance()));

        for _ in 1..10 {
            assert!(matches!(session.admit(utterance()), Admission::Rejected { gate_reset: false, .. }));
        }
        match session.admit(utterance()) {
            Admission::Rejected { skip_count, gate_reset } => {
                assert_eq!(skip_count, 10);
                assert!(gate_reset);
            }
            other => panic!("expected resetting rejection, got {:?}", other),
        }
        assert_eq!(session.gate_state(), GateState::Idle);
        assert_eq!(session.stats().gate_resets, 1);

        let fresh = admitted(session.admit(utterance()));
        assert!(fresh.id > stuck.id);

        // The stuck call finally resolves; it must neither play nor release
        assert_eq!(
            session.complete(stuck.id, exchange("stuck question", "never heard")),
            TurnStatus::Stale
        );
        assert!(session.sink().attached().is_empty());
        assert_eq!(session.gate_state(), GateState::Busy);
        assert_eq!(session.active_turn(), Some(fresh.id));
        assert!(history.get_conversation("alice").is_empty());

        // Only the turn that actually plays lands in history
        session.complete(fresh.id, exchange("next question", "answer"));
        assert_eq!(
            history.get_conversation("alice"),
            vec![Message::new(Role::User, "next question"), Message::new(Role::Assistant, "answer")]
        );
    }

    #[test]
    fn test_forced_reset_drops_active_playback() {
        let mut session = session();
        let turn = admitted(session.admit(utterance()));
        let playback_id = match session.complete(turn.id, reply()) {
            TurnStatus::Playing { playback_id, .. } => playback_id,
            other => panic!("expected playback, got {:?}", other),
        };

        for _ in 0..10 {
            session.admit(utterance());
        }
        assert_eq!(session.gate_state(), GateState::Idle);

        // The sink finishing the abandoned reply later changes nothing
        let fresh = admitted(session.admit(utterance()));
        assert!(session.on_playback_event(playback_id, PlaybackEvent::Idle).is_none());
        assert_eq!(session.active_turn(), Some(fresh.id));
    }
}

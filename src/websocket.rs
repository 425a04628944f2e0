//! # WebSocket Voice Session Handler
//!
//! One WebSocket connection is one voice session. The client streams binary audio
//! frames, the server answers with synthesized speech.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Client connects to `/ws/voice`
//! 2. **Start**: First text message is `start_session` with the participant identity
//! 3. **Audio Streaming**: Binary messages carry audio frames (Opus or raw s16le PCM)
//! 4. **Replies**: After each utterance the server sends `transcription`, then `reply`
//!    followed by one binary message with the WAV audio
//! 5. **Playback**: The client plays the WAV and reports `playback_finished` (or
//!    `playback_error`) with the reply's `playback_id`; until then new utterances
//!    are skipped
//!
//! ## Actor Model:
//! All session state lives in the actor and is only touched from its handlers. The
//! pipeline runs as a future on the actor's context and its outcome is applied back
//! inside the actor, so no locks guard the session itself.

use crate::audio::buffer::{UtteranceBuffer, UtteranceBufferConfig};
use crate::audio::codec::{decoder_for, CodecNormalizer};
use crate::config::AppConfig;
use crate::error::VoiceError;
use crate::pipeline::{
    AudioSink, DropReason, Participant, PipelineOutcome, PlaybackEvent, PlaybackTerminal,
};
use crate::services::SynthesizedAudio;
use crate::session::{Admission, GateState, SessionPhase, TurnStatus, VoiceSession};
use crate::state::AppState;

use actix::prelude::*;
use actix::WeakAddr;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message types for client-server communication.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    /// Start a voice session (client)
    #[serde(rename = "start_session")]
    StartSession {
        /// Stable participant identity; conversation history is keyed by it
        participant_id: String,
        /// Name the assistant uses for the participant
        #[serde(default)]
        display_name: Option<String>,
    },

    /// The reply with this id finished playing (client)
    #[serde(rename = "playback_finished")]
    PlaybackFinished { playback_id: Uuid },

    /// The reply with this id could not be played (client)
    #[serde(rename = "playback_error")]
    PlaybackError { playback_id: Uuid, message: String },

    /// Forget the conversation so far (client)
    #[serde(rename = "clear_history")]
    ClearHistory,

    /// Finish the session after the current turn (client)
    #[serde(rename = "end_session")]
    EndSession,

    /// Session status updates (server)
    #[serde(rename = "session_status")]
    SessionStatus {
        session_id: String,
        status: String,
        message: Option<String>,
    },

    /// What the participant said (server)
    #[serde(rename = "transcription")]
    Transcription { session_id: String, text: String },

    /// Reply metadata; the next binary message is its audio (server)
    #[serde(rename = "reply")]
    Reply {
        session_id: String,
        playback_id: Uuid,
        text: String,
        content_type: String,
        duration_ms: u64,
    },

    /// An utterance was dropped because the session was busy (server)
    #[serde(rename = "skipped")]
    Skipped {
        session_id: String,
        skip_count: u32,
        gate_reset: bool,
    },

    /// Error messages (server)
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },

    /// Heartbeat ping (server)
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    /// Heartbeat pong (client)
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// Message carrying reply audio to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct PlayAudio {
    playback_id: Uuid,
    bytes: Vec<u8>,
}

/// Audio sink backed by the session's own WebSocket connection.
///
/// Holds a weak address so the sink (owned by the actor) does not keep the actor
/// alive.
pub struct WsAudioSink {
    addr: WeakAddr<VoiceWebSocket>,
}

impl AudioSink for WsAudioSink {
    fn attach(&mut self, playback_id: Uuid, audio: SynthesizedAudio) -> Result<(), VoiceError> {
        let addr = self
            .addr
            .upgrade()
            .ok_or_else(|| VoiceError::Playback("voice connection is closed".to_string()))?;
        addr.do_send(PlayAudio {
            playback_id,
            bytes: audio.bytes,
        });
        Ok(())
    }
}

/// WebSocket actor for one voice session.
pub struct VoiceWebSocket {
    state: web::Data<AppState>,
    config: AppConfig,
    session: Option<VoiceSession<WsAudioSink>>,
    last_heartbeat: Instant,
    /// Client asked to end; close once the gate is idle
    ending: bool,
}

impl VoiceWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let config = state.get_config();
        Self {
            state,
            config,
            session: None,
            last_heartbeat: Instant::now(),
            ending: false,
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.session_id().to_string())
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &WebSocketMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize WebSocket message: {}", err),
        }
    }

    /// Send error message to client.
    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send(
            ctx,
            &WebSocketMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                session_id: self.session_id(),
            },
        );
        warn!("WebSocket error {}: {}", code, message);
    }

    fn send_status(&self, ctx: &mut ws::WebsocketContext<Self>, status: &str, message: Option<&str>) {
        if let Some(session_id) = self.session_id() {
            self.send(
                ctx,
                &WebSocketMessage::SessionStatus {
                    session_id,
                    status: status.to_string(),
                    message: message.map(str::to_string),
                },
            );
        }
    }

    /// Push the session's current phase and counters to the registry.
    fn publish(&self) {
        if let Some(session) = &self.session {
            let phase = if session.active_playback().is_some() {
                SessionPhase::Playing
            } else if session.gate_state() == GateState::Busy {
                SessionPhase::Processing
            } else {
                SessionPhase::Listening
            };
            self.state
                .sessions
                .update(session.session_id(), phase, session.skip_count(), session.stats());
        }
    }

    fn handle_start_session(
        &mut self,
        participant_id: String,
        display_name: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.session.is_some() {
            self.send_error(ctx, "session_already_started", "This connection already has a session");
            return;
        }

        let participant_id = participant_id.trim().to_string();
        if participant_id.is_empty() {
            self.send_error(ctx, "invalid_participant", "participant_id must not be empty");
            return;
        }

        let audio = &self.config.audio;
        let decoder = match decoder_for(&audio.codec, audio.sample_rate, audio.channels) {
            Ok(decoder) => decoder,
            Err(err) => {
                self.send_error(ctx, "codec_error", &err.to_string());
                return;
            }
        };

        let session_id = Uuid::new_v4().to_string();
        let participant = Participant::new(participant_id, display_name);

        if let Err(err) = self.state.sessions.register(&session_id, &participant) {
            self.state.record_session_rejected();
            self.send_error(ctx, "session_limit", &err);
            ctx.stop();
            return;
        }

        let buffer = UtteranceBuffer::new(
            CodecNormalizer::new(decoder),
            UtteranceBufferConfig {
                silence_duration: self.config.silence_duration(),
                max_frames: audio.max_utterance_frames,
            },
        );
        let sink = WsAudioSink {
            addr: ctx.address().downgrade(),
        };

        info!(
            session_id = %session_id,
            participant = %participant.id,
            "Voice session started for {}",
            participant.display_name()
        );

        self.session = Some(VoiceSession::new(
            session_id,
            participant,
            buffer,
            self.config.session.max_skip_count,
            sink,
            self.state.history.clone(),
        ));
        self.state.record_session_opened();
        self.send_status(ctx, "listening", Some("Session started"));
    }

    fn handle_admission(&mut self, admission: Admission, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.session_id().to_string();

        match admission {
            Admission::Admitted(turn) => {
                self.state.record_admitted();

                let orchestrator = self.state.orchestrator.clone();
                let participant = session.participant().clone();
                let turn_id = turn.id;
                let started = Instant::now();
                let pipeline_session_id = session_id.clone();

                let pipeline = async move {
                    orchestrator
                        .process(&pipeline_session_id, turn.utterance, &participant)
                        .await
                };
                ctx.spawn(pipeline.into_actor(self).map(move |outcome, act, ctx| {
                    act.handle_turn_complete(turn_id, outcome, started, ctx);
                }));

                self.send_status(ctx, "processing", None);
            }
            Admission::Rejected { skip_count, gate_reset } => {
                self.state.record_skipped(gate_reset);
                self.send(
                    ctx,
                    &WebSocketMessage::Skipped {
                        session_id,
                        skip_count,
                        gate_reset,
                    },
                );
            }
        }

        self.publish();
    }

    fn handle_turn_complete(
        &mut self,
        turn_id: u64,
        outcome: PipelineOutcome,
        started: Instant,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.session_id().to_string();

        match session.complete(turn_id, outcome) {
            TurnStatus::Playing {
                playback_id,
                transcript,
                reply_text,
                content_type,
                duration,
            } => {
                self.state.record_reply_ready(started.elapsed());
                self.send(
                    ctx,
                    &WebSocketMessage::Transcription {
                        session_id: session_id.clone(),
                        text: transcript,
                    },
                );
                // The audio itself follows as a binary frame from the sink
                self.send(
                    ctx,
                    &WebSocketMessage::Reply {
                        session_id,
                        playback_id,
                        text: reply_text,
                        content_type,
                        duration_ms: duration.as_millis() as u64,
                    },
                );
            }
            TurnStatus::Released(reason) => {
                self.state.record_dropped(&reason);
                if let DropReason::Failed(err) = &reason {
                    self.send_error(ctx, &format!("{}_failed", err.stage()), &err.to_string());
                }
                self.send_status(ctx, "listening", None);
                self.finish_if_ending(ctx);
            }
            TurnStatus::Stale => {}
        }

        self.publish();
    }

    fn handle_playback_event(&mut self, playback_id: Uuid, event: PlaybackEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let Some(terminal) = session.on_playback_event(playback_id, event) else {
            return;
        };

        match &terminal {
            PlaybackTerminal::Finished { .. } => self.state.record_playback(true),
            PlaybackTerminal::Failed { message, .. } => {
                self.state.record_playback(false);
                // Degraded for this turn only; the session keeps listening
                self.send_error(ctx, "playback_error", message);
            }
        }

        self.send_status(ctx, "listening", None);
        self.publish();
        self.finish_if_ending(ctx);
    }

    fn handle_clear_history(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.as_ref() else {
            self.send_error(ctx, "session_not_started", "Send start_session first");
            return;
        };
        let participant_id = session.participant().id.clone();
        let cleared = self.state.history.clear(&participant_id);
        info!(participant = %participant_id, cleared, "Conversation history cleared");
        self.send_status(ctx, "history_cleared", None);
    }

    fn handle_end_session(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.ending = true;

        // Whatever is still buffered becomes the final utterance
        let admission = self.session.as_mut().and_then(|session| session.flush());
        if let Some(admission) = admission {
            self.handle_admission(admission, ctx);
        }

        self.finish_if_ending(ctx);
    }

    fn finish_if_ending(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.ending {
            return;
        }
        let idle = self
            .session
            .as_ref()
            .map_or(true, |session| session.gate_state() == GateState::Idle);
        if idle {
            self.send_status(ctx, "ended", Some("Session ended"));
            ctx.close(Some(ws::CloseCode::Normal.into()));
            ctx.stop();
        }
    }

    fn handle_audio_frame(&mut self, frame: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if self.ending {
            return;
        }
        if self.session.is_none() {
            self.send_error(ctx, "session_not_started", "Send start_session before audio");
            return;
        }

        let admission = self
            .session
            .as_mut()
            .and_then(|session| session.on_frame(frame, Instant::now()));
        if let Some(admission) = admission {
            self.handle_admission(admission, ctx);
        }
    }
}

/// Implement Actor trait for WebSocket handling.
impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        let heartbeat_timeout = Duration::from_secs(self.config.session.heartbeat_timeout_secs);
        ctx.run_interval(HEARTBEAT_INTERVAL, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > heartbeat_timeout {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
                act.send(ctx, &WebSocketMessage::Ping { timestamp });
            }
        });

        // End-of-speech detection by silence
        ctx.run_interval(self.config.silence_poll_interval(), |act, ctx| {
            let admission = act
                .session
                .as_mut()
                .and_then(|session| session.poll_end_of_speech(Instant::now()));
            if let Some(admission) = admission {
                act.handle_admission(admission, ctx);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = &self.session {
            self.state.sessions.remove(session.session_id());
            info!(
                session_id = %session.session_id(),
                stats = ?session.stats(),
                "Voice session closed"
            );
        } else {
            info!("WebSocket connection stopped");
        }
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WebSocketMessage>(&text) {
                Ok(WebSocketMessage::StartSession { participant_id, display_name }) => {
                    self.handle_start_session(participant_id, display_name, ctx);
                }
                Ok(WebSocketMessage::PlaybackFinished { playback_id }) => {
                    self.handle_playback_event(playback_id, PlaybackEvent::Idle, ctx);
                }
                Ok(WebSocketMessage::PlaybackError { playback_id, message }) => {
                    self.handle_playback_event(playback_id, PlaybackEvent::Error(message), ctx);
                }
                Ok(WebSocketMessage::ClearHistory) => self.handle_clear_history(ctx),
                Ok(WebSocketMessage::EndSession) => self.handle_end_session(ctx),
                Ok(WebSocketMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(_) => {
                    warn!("Received unexpected message type from client");
                }
                Err(err) => {
                    self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
                }
            },
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio_frame(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Handle PlayAudio messages from the sink.
impl Handler<PlayAudio> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PlayAudio, ctx: &mut Self::Context) {
        debug!(playback_id = %msg.playback_id, bytes = msg.bytes.len(), "Sending reply audio");
        ctx.binary(msg.bytes);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Upgrades the request and hands the connection to a fresh [`VoiceWebSocket`].
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(VoiceWebSocket::new(state), &req, stream)
}

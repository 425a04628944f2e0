//! # Application State Management
//!
//! Shared handles that every HTTP handler and every voice session actor needs.
//!
//! ## What lives here:
//! - **Configuration**: loaded once at startup, read-only afterwards
//! - **Pipeline metrics**: counters updated by sessions, read by `/metrics`
//! - **Session registry**: live voice sessions and the concurrency limit
//! - **Conversation history**: shared between voice sessions and the chat endpoint
//! - **Orchestrator**: the service clients, constructed once and cloned per turn
//!
//! ### Arc<RwLock<T>> Pattern
//! Configuration never changes after startup, so it is a plain `Arc`. Metrics are written by many session actors and read by handlers, so they sit
//! behind `Arc<RwLock<..>>`. Reads are frequent and cheap; each write holds the
//! lock for a single counter bump.

use crate::config::AppConfig;
use crate::conversation::ConversationHistory;
use crate::pipeline::orchestrator::{Orchestrator, PersonaSettings};
use crate::pipeline::DropReason;
use crate::services::{GeminiClient, GoogleSpeechClient, StyleBertVits2Client};
use crate::session::SessionManager;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (fixed after startup)
    pub config: Arc<AppConfig>,

    /// Pipeline counters across all sessions
    pub metrics: Arc<RwLock<PipelineMetrics>>,

    /// Live voice sessions
    pub sessions: Arc<SessionManager>,

    /// Per-participant conversation history
    pub history: Arc<ConversationHistory>,

    /// Transcribe → generate → synthesize driver
    pub orchestrator: Orchestrator,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across every voice session and chat request.
///
/// ## Why these metrics matter:
/// - **utterances_skipped / gate_resets**: how often speakers talk over the bot,
///   and how often a stuck collaborator had to be abandoned
/// - **dropped_by_reason**: which stage is failing
/// - **total_pipeline_ms**: end-to-end latency from end-of-speech to reply audio
#[derive(Debug, Default, Clone)]
pub struct PipelineMetrics {
    pub sessions_opened: u64,
    pub sessions_rejected: u64,
    pub utterances_admitted: u64,
    pub utterances_skipped: u64,
    pub gate_resets: u64,
    pub replies_ready: u64,
    pub replies_played: u64,
    pub playback_failures: u64,
    pub turns_dropped: u64,
    pub dropped_by_reason: HashMap<String, u64>,
    pub total_pipeline_ms: u64,
    pub chat_requests: u64,
    pub chat_errors: u64,
}

impl PipelineMetrics {
    /// Average time from admission to reply audio, over successful turns.
    pub fn average_pipeline_ms(&self) -> f64 {
        if self.replies_ready > 0 {
            self.total_pipeline_ms as f64 / self.replies_ready as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Build the production state: real service clients from `config`.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let history = Arc::new(ConversationHistory::new(config.conversation.max_messages));

        let orchestrator = Orchestrator::new(
            Arc::new(GoogleSpeechClient::new(config.transcription.clone())?),
            Arc::new(GeminiClient::new(config.generation.clone())?),
            Arc::new(StyleBertVits2Client::new(config.synthesis.clone())?),
            history,
            PersonaSettings::from(&config.generation),
        );

        Ok(Self::with_orchestrator(config, orchestrator))
    }

    /// Build state around an existing orchestrator, sharing its history.
    pub fn with_orchestrator(config: AppConfig, orchestrator: Orchestrator) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(config.session.max_concurrent_sessions)),
            history: orchestrator.history().clone(),
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(PipelineMetrics::default())),
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    fn with_metrics(&self, update: impl FnOnce(&mut PipelineMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn record_session_opened(&self) {
        self.with_metrics(|m| m.sessions_opened += 1);
    }

    pub fn record_session_rejected(&self) {
        self.with_metrics(|m| m.sessions_rejected += 1);
    }

    pub fn record_admitted(&self) {
        self.with_metrics(|m| m.utterances_admitted += 1);
    }

    pub fn record_skipped(&self, gate_reset: bool) {
        self.with_metrics(|m| {
            m.utterances_skipped += 1;
            if gate_reset {
                m.gate_resets += 1;
            }
        });
    }

    /// A pipeline run produced reply audio after `elapsed`.
    pub fn record_reply_ready(&self, elapsed: Duration) {
        self.with_metrics(|m| {
            m.replies_ready += 1;
            m.total_pipeline_ms += elapsed.as_millis() as u64;
        });
    }

    pub fn record_dropped(&self, reason: &DropReason) {
        self.with_metrics(|m| {
            m.turns_dropped += 1;
            *m.dropped_by_reason.entry(reason.as_str().to_string()).or_insert(0) += 1;
        });
    }

    pub fn record_playback(&self, finished: bool) {
        self.with_metrics(|m| {
            if finished {
                m.replies_played += 1;
            } else {
                m.playback_failures += 1;
            }
        });
    }

    pub fn record_chat(&self, is_error: bool) {
        self.with_metrics(|m| {
            m.chat_requests += 1;
            if is_error {
                m.chat_errors += 1;
            }
        });
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> PipelineMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use crate::pipeline::testing::FakeServices;

    fn state() -> AppState {
        AppState::with_orchestrator(AppConfig::default(), FakeServices::new().orchestrator(10))
    }

    #[test]
    fn test_history_is_shared_with_orchestrator() {
        let state = state();
        state.orchestrator.history().add_message("alice", crate::conversation::Role::User, "hi");
        assert_eq!(state.history.get_conversation("alice").len(), 1);
    }

    #[test]
    fn test_config_is_shared_between_clones() {
        let state = state();
        let clone = state.clone();
        assert!(Arc::ptr_eq(&state.config, &clone.config));
        assert_eq!(clone.get_config().server.port, state.config.server.port);
    }

    #[test]
    fn test_dropped_turns_are_counted_by_reason() {
        let state = state();
        state.record_dropped(&DropReason::EmptyTranscript);
        state.record_dropped(&DropReason::Failed(VoiceError::Generation("x".to_string())));
        state.record_dropped(&DropReason::Failed(VoiceError::Generation("y".to_string())));

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.turns_dropped, 3);
        assert_eq!(metrics.dropped_by_reason.get("generation"), Some(&2));
        assert_eq!(metrics.dropped_by_reason.get("empty_transcript"), Some(&1));
    }

    #[test]
    fn test_average_pipeline_latency() {
        let state = state();
        assert_eq!(state.get_metrics_snapshot().average_pipeline_ms(), 0.0);
        state.record_reply_ready(Duration::from_millis(1000));
        state.record_reply_ready(Duration::from_millis(3000));
        assert_eq!(state.get_metrics_snapshot().average_pipeline_ms(), 2000.0);
    }

    #[test]
    fn test_skip_with_reset_counts_both() {
        let state = state();
        state.record_skipped(false);
        state.record_skipped(true);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.utterances_skipped, 2);
        assert_eq!(metrics.gate_resets, 1);
    }
}

//! # Session Registry
//!
//! Process-wide view of the live voice sessions, used to enforce the connection
//! limit and to answer the session listing and health endpoints.
//!
//! The registry holds snapshots, not the sessions themselves: each session is
//! owned by its WebSocket actor, which publishes its state here after every
//! transition.

use crate::pipeline::Participant;
use crate::session::voice::SessionStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Coarse phase of a voice session, as reported to clients and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for speech
    Listening,
    /// An utterance is in the pipeline
    Processing,
    /// A reply is playing
    Playing,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Listening => "listening",
            SessionPhase::Processing => "processing",
            SessionPhase::Playing => "playing",
        }
    }
}

/// Snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub participant_id: String,
    pub display_name: String,
    pub phase: SessionPhase,
    pub skip_count: u32,
    pub stats: SessionStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Totals across all live sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionManagerSummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub phase_counts: HashMap<String, usize>,
}

/// Registry of live voice sessions.
///
/// ## Thread Safety:
/// Uses RwLock so listings (many readers) don't block each other; registration
/// and updates take the write lock briefly.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    max_concurrent_sessions: usize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a new session.
    ///
    /// ## Returns:
    /// - **Ok(())**: Session registered
    /// - **Err(message)**: Limit reached or the id is already taken
    pub fn register(&self, session_id: &str, participant: &Participant) -> Result<(), String> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        if sessions.contains_key(session_id) {
            return Err(format!("Session ID '{}' already exists", session_id));
        }

        let now = Utc::now();
        sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                participant_id: participant.id.clone(),
                display_name: participant.display_name().to_string(),
                phase: SessionPhase::Listening,
                skip_count: 0,
                stats: SessionStats::default(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    /// Publish a session's latest state. Unknown ids are ignored.
    pub fn update(&self, session_id: &str, phase: SessionPhase, skip_count: u32, stats: &SessionStats) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = sessions.get_mut(session_id) {
            info.phase = phase;
            info.skip_count = skip_count;
            info.stats = stats.clone();
            info.updated_at = Utc::now();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(session_id).cloned()
    }

    /// Remove a session (connection closed).
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id).is_some()
    }

    pub fn active_session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// All live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<SessionInfo> = sessions.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));
        list
    }

    pub fn summary(&self) -> SessionManagerSummary {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        let mut phase_counts = HashMap::new();
        for info in sessions.values() {
            *phase_counts.entry(info.phase.as_str().to_string()).or_insert(0) += 1;
        }

        SessionManagerSummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            phase_counts,
        }
    }
}

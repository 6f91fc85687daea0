pub mod history;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::types::{Event, GuidelineReport, Message, Role, VideoAnalysis};

/// One user's ongoing interaction context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<VideoAnalysis>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

/// In-memory session store: the single owner of mutable session state.
///
/// Expiry is lazy, evaluated on every access, with `sweep_expired`
/// available for periodic background eviction. Both paths converge on the
/// same remove-if-expired primitive, so they are safe to mix.
///
/// Absence is a normal return value here, never an error; callers decide
/// whether a missing session is a 404-class condition.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    max_history: usize,
    timeout: TimeDelta,
}

impl SessionStore {
    pub fn new(max_history: usize, timeout: TimeDelta) -> Self {
        Self {
            sessions: HashMap::new(),
            max_history,
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        Self::new(
            config.max_history as usize,
            TimeDelta::minutes(i64::from(config.timeout_minutes)),
        )
    }

    /// Allocate a fresh session with empty history and context.
    pub fn create(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: now,
                last_activity: now,
                history: Vec::new(),
                analysis: None,
                context: HashMap::new(),
            },
        );
        info!(session = %id, "created new session");
        id
    }

    /// Look up a session, evicting it first if it has sat idle past the
    /// timeout. A hit refreshes `last_activity`.
    pub fn get(&mut self, id: &str) -> Option<&Session> {
        let expired = match self.sessions.get(id) {
            Some(session) => Utc::now() - session.last_activity > self.timeout,
            None => return None,
        };

        if expired {
            info!(session = %id, "session expired");
            self.sessions.remove(id);
            return None;
        }

        let session = self.sessions.get_mut(id)?;
        session.last_activity = Utc::now();
        Some(session)
    }

    /// Remove a session. No-op if absent.
    pub fn delete(&mut self, id: &str) {
        if self.sessions.remove(id).is_some() {
            info!(session = %id, "cleared session");
        }
    }

    /// Evict every session idle past the timeout. Returns the count evicted.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let timeout = self.timeout;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.last_activity <= timeout);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            info!(evicted, "swept expired sessions");
        }
        evicted
    }

    /// Sweep, then report how many sessions remain.
    pub fn count_active(&mut self) -> usize {
        self.sweep_expired();
        self.sessions.len()
    }

    /// Append a message to a session's history, applying the retention
    /// policy. Ignored (with a warning) when the session is absent.
    pub fn append_message(
        &mut self,
        id: &str,
        role: Role,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) {
        if self.get(id).is_none() {
            warn!(session = %id, "append to unknown session ignored");
            return;
        }
        let max_history = self.max_history;
        if let Some(session) = self.sessions.get_mut(id) {
            session.push_message(Message::new(role, content, metadata), max_history);
            debug!(session = %id, role = role.as_str(), "appended message");
        }
    }

    /// Attach a video analysis to a session, replacing any prior one.
    ///
    /// Events are stably sorted ascending by timestamp before storage, and
    /// a system message recording the analysis is appended to the history.
    pub fn store_analysis(
        &mut self,
        id: &str,
        mut events: Vec<Event>,
        summary: String,
        summary_failed: bool,
        guidelines: GuidelineReport,
    ) {
        if self.get(id).is_none() {
            warn!(session = %id, "store analysis for unknown session ignored");
            return;
        }

        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let note = format!(
            "Video analyzed. Found {} events. Summary: {}",
            events.len(),
            truncate(&summary, 200)
        );

        if let Some(session) = self.sessions.get_mut(id) {
            session.analysis = Some(VideoAnalysis {
                events,
                summary,
                summary_failed,
                guidelines,
                analyzed_at: Utc::now(),
            });
        }

        self.append_message(
            id,
            Role::System,
            note,
            Some(serde_json::json!({"type": "video_analysis"})),
        );
        info!(session = %id, "stored video analysis");
    }

    /// Upsert a context key. Last write wins.
    pub fn update_context(&mut self, id: &str, key: &str, value: serde_json::Value) {
        if self.get(id).is_none() {
            return;
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.context.insert(key.to_string(), value);
            debug!(session = %id, key, "updated context");
        }
    }

    /// Conversation history, full or just the trailing `limit` entries.
    pub fn history(&mut self, id: &str, limit: Option<usize>) -> Vec<Message> {
        let Some(session) = self.get(id) else {
            return Vec::new();
        };
        match limit {
            Some(n) => {
                let start = session.history.len().saturating_sub(n);
                session.history[start..].to_vec()
            }
            None => session.history.clone(),
        }
    }

    /// Snapshot of the attached video analysis, if any.
    pub fn analysis(&mut self, id: &str) -> Option<VideoAnalysis> {
        self.get(id).and_then(|session| session.analysis.clone())
    }

    /// Snapshot of the session context. Does not reflect later mutations.
    pub fn context(&mut self, id: &str) -> HashMap<String, serde_json::Value> {
        self.get(id)
            .map(|session| session.context.clone())
            .unwrap_or_default()
    }

    /// Full session snapshot for the outward API.
    pub fn snapshot(&mut self, id: &str) -> Option<Session> {
        self.get(id).cloned()
    }

    /// Export a session as pretty-printed JSON.
    pub fn export(&mut self, id: &str) -> Option<String> {
        let session = self.get(id)?;
        serde_json::to_string_pretty(session).ok()
    }

    /// Direct access to the underlying map, for maintenance and tests.
    pub fn sessions_mut(&mut self) -> &mut HashMap<String, Session> {
        &mut self.sessions
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

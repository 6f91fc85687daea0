pub mod queries;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Error;
use crate::provider::CompletionModel;
use crate::session::SessionStore;
use crate::types::{Message, Role, VideoAnalysis};

pub const SYSTEM_PROMPT: &str = "\
You are an intelligent visual understanding assistant specializing in video \
analysis. You have access to video analysis results including detected \
events, summaries, and guideline adherence information. Answer questions \
about analyzed videos, explain events and violations, and keep context \
across conversation turns. Reference specific timestamps when available. \
If asked about something not in the video analysis, clearly state that the \
information is not available.";

/// Reply used when the chat model call fails. The turn still completes;
/// no assistant message is committed for it.
pub const FALLBACK_REPLY: &str =
    "I apologize, but I encountered an error processing your message. Please try again.";

/// How many trailing history entries go into the prompt.
const PROMPT_HISTORY_LIMIT: usize = 10;

/// How many events the system prompt samples from the analysis.
const PROMPT_EVENT_SAMPLE: usize = 5;

/// Orchestrates one chat turn against a session.
///
/// The model is a replaceable capability behind [`CompletionModel`]; the
/// engine holds no session state of its own and never keeps the store
/// locked across a model call.
pub struct ChatEngine {
    model: Arc<dyn CompletionModel>,
}

impl ChatEngine {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Process one user message: append it, assemble the bounded prompt,
    /// generate a reply, commit the assistant message, and refresh derived
    /// context. Callers serialize turns per session (the gateway holds the
    /// per-session lock around this call).
    ///
    /// Returns `Error::NotFound` when the session is absent or expired. A
    /// failed generation is recovered locally into [`FALLBACK_REPLY`].
    pub async fn process_message(
        &self,
        store: &RwLock<SessionStore>,
        session_id: &str,
        text: &str,
    ) -> Result<String, Error> {
        let (history, analysis) = {
            let mut store = store.write().await;
            if store.get(session_id).is_none() {
                return Err(Error::NotFound);
            }
            store.append_message(session_id, Role::User, text, None);
            (
                store.history(session_id, Some(PROMPT_HISTORY_LIMIT)),
                store.analysis(session_id),
            )
        };

        let messages = build_messages(&history, analysis.as_ref(), text);

        match self.model.generate(&messages).await {
            Ok(reply) => {
                let mut store = store.write().await;
                store.append_message(session_id, Role::Assistant, &reply, None);
                if let Some(topics) = derive_topics(text) {
                    store.update_context(session_id, "current_topics", topics);
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(session = %session_id, "chat generation failed: {e}");
                Ok(FALLBACK_REPLY.into())
            }
        }
    }
}

/// Assemble the prompt: system instructions (with condensed analysis
/// context when available), prior user/assistant history excluding the
/// just-appended message, then the current message.
pub fn build_messages(
    history: &[Message],
    analysis: Option<&VideoAnalysis>,
    current: &str,
) -> Vec<serde_json::Value> {
    let mut system = SYSTEM_PROMPT.to_string();

    if let Some(analysis) = analysis {
        system.push_str("\n\nVideo Analysis Available:\n");
        system.push_str(&format!("Summary: {}\n", analysis.summary));
        system.push_str(&format!("Total Events: {}\n", analysis.events.len()));
        system.push_str(&format!(
            "Guideline Compliance: {}\n",
            analysis.guidelines.compliance_status
        ));
        system.push_str(&format!(
            "Violations: {}\n",
            analysis.guidelines.violations_count
        ));

        if !analysis.events.is_empty() {
            system.push_str("\nSample Events:\n");
            for event in analysis.events.iter().take(PROMPT_EVENT_SAMPLE) {
                system.push_str(&format!(
                    "- [{:.1}s] {}\n",
                    event.timestamp, event.description
                ));
            }
        }
    }

    let mut messages = vec![serde_json::json!({ "role": "system", "content": system })];

    // Prior turns only; the current message was already appended to
    // history, so skip the final entry.
    let prior = &history[..history.len().saturating_sub(1)];
    for message in prior {
        if matches!(message.role, Role::User | Role::Assistant) {
            messages.push(message.as_provider_message());
        }
    }

    messages.push(serde_json::json!({ "role": "user", "content": current }));
    messages
}

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("traffic", &["traffic", "vehicle", "car", "pedestrian", "light", "road"]),
    ("safety", &["safety", "violation", "danger", "hazard", "risk"]),
    ("timeline", &["when", "time", "timestamp", "sequence", "order"]),
    ("summary", &["summary", "overview", "summarize", "brief"]),
];

/// Derive topic tags from a user message by keyword matching. Returns
/// `None` when no topic matches.
pub fn derive_topics(message: &str) -> Option<serde_json::Value> {
    let lower = message.to_lowercase();
    let topics: Vec<&str> = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(topic, _)| *topic)
        .collect();

    if topics.is_empty() {
        None
    } else {
        Some(serde_json::json!(topics))
    }
}

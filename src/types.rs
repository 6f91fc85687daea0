use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A message in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Create a message with the current timestamp.
    pub fn new(role: Role, content: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            metadata,
        }
    }

    /// Convert to the provider-facing chat-completion format.
    pub fn as_provider_message(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.role.as_str(),
            "content": self.content,
        })
    }
}

/// A discrete occurrence detected in the video, timestamped and classified.
///
/// Decoded leniently from model output: everything beyond timestamp and
/// description is optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Seconds from the start of the video. Non-negative.
    pub timestamp: f64,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    pub description: String,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub guideline_violation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Closest sampled frame, filled in after decoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<u64>,
}

fn default_event_type() -> String {
    "other".into()
}

fn default_severity() -> String {
    "info".into()
}

/// One entry in the guideline-adherence violation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub timestamp: f64,
    pub description: String,
    pub severity: String,
}

/// Aggregate compliance report derived from events flagged as violations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuidelineReport {
    pub total_events: usize,
    pub violations_count: usize,
    pub high_severity_count: usize,
    pub medium_severity_count: usize,
    pub violation_rate: f64,
    pub violations: Vec<Violation>,
    pub compliance_status: String,
}

/// Result of analyzing one uploaded video. At most one per session;
/// a later upload overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAnalysis {
    /// Always sorted ascending by timestamp, ties in insertion order.
    pub events: Vec<Event>,
    pub summary: String,
    /// Set when event detection succeeded but summarization did not.
    #[serde(default)]
    pub summary_failed: bool,
    pub guidelines: GuidelineReport,
    pub analyzed_at: chrono::DateTime<chrono::Utc>,
}

/// A still sampled from the video, ready to send to the vision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_number: u64,
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// Base64-encoded JPEG.
    pub image: String,
    pub width: u32,
    pub height: u32,
}

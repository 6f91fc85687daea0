use crate::types::{Message, Role, VideoAnalysis};

/// Seconds of slack when matching events to a queried timestamp.
const TIME_WINDOW_SECS: f64 = 2.0;

/// How many events a type-filtered summary lists.
const SUMMARY_LIMIT: usize = 5;

const NO_ANALYSIS: &str = "No video has been analyzed yet. Please upload a video first.";

/// Typed queries answered directly from an attached analysis, without a
/// model round-trip.
#[derive(Debug, Clone)]
pub enum AnalysisQuery {
    /// Events within two seconds of the given timestamp.
    EventAtTime { timestamp: f64 },
    /// Every recorded guideline violation with timestamp and severity.
    ViolationDetails,
    /// Events whose type contains the given fragment.
    EventSummary { event_type: String },
}

/// Answer a typed query over the session's analysis.
pub fn answer_query(analysis: Option<&VideoAnalysis>, query: &AnalysisQuery) -> String {
    let Some(analysis) = analysis else {
        return NO_ANALYSIS.into();
    };

    match query {
        AnalysisQuery::EventAtTime { timestamp } => {
            let nearby: Vec<_> = analysis
                .events
                .iter()
                .filter(|e| (e.timestamp - timestamp).abs() < TIME_WINDOW_SECS)
                .collect();

            if nearby.is_empty() {
                return format!("No events found around {timestamp}s");
            }
            let mut answer = format!("Events around {timestamp}s:\n");
            for event in nearby {
                answer.push_str(&format!(
                    "- [{:.1}s] {}\n",
                    event.timestamp, event.description
                ));
            }
            answer
        }

        AnalysisQuery::ViolationDetails => {
            let violations = &analysis.guidelines.violations;
            if violations.is_empty() {
                return "No violations detected in the video.".into();
            }
            let mut answer = String::from("Detected violations:\n");
            for violation in violations {
                answer.push_str(&format!(
                    "- [{:.1}s] {} (Severity: {})\n",
                    violation.timestamp, violation.description, violation.severity
                ));
            }
            answer
        }

        AnalysisQuery::EventSummary { event_type } => {
            let needle = event_type.to_lowercase();
            let matching: Vec<_> = analysis
                .events
                .iter()
                .filter(|e| e.event_type.to_lowercase().contains(&needle))
                .collect();

            if matching.is_empty() {
                return format!("No {event_type} events found in the video.");
            }
            let mut answer = format!("Found {} {event_type} events:\n", matching.len());
            for event in matching.iter().take(SUMMARY_LIMIT) {
                answer.push_str(&format!(
                    "- [{:.1}s] {}\n",
                    event.timestamp, event.description
                ));
            }
            answer
        }
    }
}

/// Coarse summary of a conversation: exchange count plus topics inferred
/// from the user's questions.
pub fn conversation_summary(history: &[Message]) -> String {
    if history.is_empty() {
        return "No conversation history available.".into();
    }

    let user_questions: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();

    let mut topics = Vec::new();
    for question in &user_questions {
        let lower = question.to_lowercase();
        for (topic, fragments) in [
            ("events", vec!["event"]),
            ("violations", vec!["violation", "guideline"]),
            ("summary", vec!["summary"]),
            ("timeline", vec!["time", "when"]),
        ] {
            if fragments.iter().any(|f| lower.contains(f)) && !topics.contains(&topic) {
                topics.push(topic);
            }
        }
    }

    format!(
        "Conversation Summary:\nTotal exchanges: {}\nTopics discussed: {}",
        user_questions.len(),
        if topics.is_empty() {
            "general".to_string()
        } else {
            topics.join(", ")
        }
    )
}

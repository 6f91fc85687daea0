use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::provider::CompletionModel;
use crate::types::{Event, GuidelineReport, Violation};

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a video analysis expert. Create a detailed, comprehensive summary \
of the video based on the detected events: the scene and environmental \
conditions, traffic elements, vehicle and pedestrian activity, violations \
and safety concerns, positive observations, and how events unfold \
chronologically. Be specific with timestamps and descriptions. \
Length: 250-400 words.";

const EMPTY_SUMMARY: &str = "No significant events detected in the video.";
const SUMMARY_UNAVAILABLE: &str = "Summary generation failed; event list is still available.";

/// Compile the guideline-adherence report from detected events. Pure and
/// local, no model involved.
pub fn guideline_report(events: &[Event]) -> GuidelineReport {
    let violations: Vec<&Event> = events.iter().filter(|e| e.guideline_violation).collect();
    let high = events.iter().filter(|e| e.severity == "high").count();
    let medium = events.iter().filter(|e| e.severity == "medium").count();

    let compliance_status = match violations.len() {
        0 => "Good",
        1 | 2 => "Needs Attention",
        _ => "Poor",
    };

    GuidelineReport {
        total_events: events.len(),
        violations_count: violations.len(),
        high_severity_count: high,
        medium_severity_count: medium,
        violation_rate: if events.is_empty() {
            0.0
        } else {
            violations.len() as f64 / events.len() as f64
        },
        violations: violations
            .iter()
            .map(|e| Violation {
                timestamp: e.timestamp,
                description: e
                    .violation_details
                    .clone()
                    .unwrap_or_else(|| e.description.clone()),
                severity: e.severity.clone(),
            })
            .collect(),
        compliance_status: compliance_status.into(),
    }
}

/// Generates the narrative summary over detected events via the chat model.
pub struct Summarizer {
    model: Arc<dyn CompletionModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Summarize events and compile the guideline report.
    ///
    /// The report is computed locally and always present. A failed model
    /// call yields a placeholder summary with `summary_failed = true`;
    /// detected events are never discarded over a summary failure.
    pub async fn summarize(&self, events: &[Event]) -> (String, bool, GuidelineReport) {
        let report = guideline_report(events);

        if events.is_empty() {
            return (EMPTY_SUMMARY.into(), false, report);
        }

        let serialized = serde_json::to_string_pretty(events).unwrap_or_default();
        let messages = vec![
            serde_json::json!({ "role": "system", "content": SUMMARY_SYSTEM_PROMPT }),
            serde_json::json!({
                "role": "user",
                "content": format!("Events detected in video:\n{serialized}"),
            }),
        ];

        match self.model.generate(&messages).await {
            Ok(summary) => (summary, false, report),
            Err(e) => {
                warn!("summary generation failed: {e}");
                (SUMMARY_UNAVAILABLE.into(), true, report)
            }
        }
    }
}

/// Per-guideline breakdown for a named guideline set.
#[derive(Debug, Clone, Serialize)]
pub struct GuidelineAnalysis {
    pub guideline_type: String,
    pub checked_guidelines: Vec<String>,
    pub results: HashMap<String, GuidelineResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuidelineResult {
    pub related_events: usize,
    pub violations: usize,
    pub status: String,
}

/// Guideline sets for common scenarios. Unknown kinds fall back to
/// "general".
pub fn guideline_set(kind: &str) -> &'static [&'static str] {
    match kind {
        "traffic" => &[
            "Traffic light compliance",
            "Speed limit adherence",
            "Pedestrian right of way",
            "Lane discipline",
            "Stop sign compliance",
        ],
        "safety" => &[
            "PPE usage",
            "Hazard awareness",
            "Emergency procedures",
            "Equipment handling",
            "Restricted area access",
        ],
        _ => &[
            "Activity detection",
            "Object tracking",
            "Anomaly detection",
            "Pattern recognition",
        ],
    }
}

/// Check events against a named guideline set by matching guideline text
/// against event descriptions and violation details.
pub fn analyze_guidelines(events: &[Event], kind: &str) -> GuidelineAnalysis {
    let guidelines = guideline_set(kind);
    let mut results = HashMap::new();

    for guideline in guidelines {
        let needle = guideline.to_lowercase();
        let related: Vec<&Event> = events
            .iter()
            .filter(|e| {
                e.description.to_lowercase().contains(&needle)
                    || e.violation_details
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect();
        let violations = related.iter().filter(|e| e.guideline_violation).count();
        results.insert(
            guideline.to_string(),
            GuidelineResult {
                related_events: related.len(),
                violations,
                status: if violations == 0 { "Pass" } else { "Fail" }.into(),
            },
        );
    }

    GuidelineAnalysis {
        guideline_type: kind.to_string(),
        checked_guidelines: guidelines.iter().map(|g| g.to_string()).collect(),
        results,
    }
}

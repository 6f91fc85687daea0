pub mod report;

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Error;
use crate::provider::CompletionModel;
use crate::types::{Event, Frame};

/// Frames sent to the vision model per call.
pub const FRAME_BATCH_SIZE: usize = 5;

const VISION_SYSTEM_PROMPT: &str = "\
You are an expert video analyst with specialized knowledge in traffic laws, \
safety regulations, and behavioral analysis. Analyze the supplied video \
frames for traffic and vehicle activity, pedestrian and cyclist behavior, \
environmental context, and safety or compliance concerns. Be specific: \
describe what is happening, where, and at which timestamp.

Return a JSON array where each detected element gets its own entry:
{
    \"timestamp\": float,
    \"event_type\": \"traffic_signal|vehicle_movement|pedestrian_activity|violation|hazard|environmental|other\",
    \"description\": \"Detailed description of what is happening\",
    \"objects\": [\"car\", \"pedestrian\", ...],
    \"severity\": \"info|low|medium|high|critical\",
    \"guideline_violation\": boolean,
    \"violation_details\": \"Specific law or guideline violated, if applicable\",
    \"confidence\": 0.0-1.0
}";

/// Detects events in sampled frames via the vision model.
///
/// The model's reply is free-form text; decoding it into structured events
/// is an explicit fallible step with a per-frame fallback, so a bad reply
/// degrades a batch rather than discarding it.
pub struct EventDetector {
    model: Arc<dyn CompletionModel>,
}

impl EventDetector {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Detect events across all frames, in batches. Always returns events
    /// sorted ascending by timestamp (stable), falling back to one generic
    /// scene event per frame for any batch that fails.
    pub async fn detect_events(&self, frames: &[Frame]) -> Vec<Event> {
        let mut events = Vec::new();

        for batch in frames.chunks(FRAME_BATCH_SIZE) {
            match self.analyze_batch(batch).await {
                Ok(mut batch_events) => events.append(&mut batch_events),
                Err(e) => {
                    warn!("frame batch analysis failed, using fallback events: {e}");
                    events.extend(fallback_events(batch));
                }
            }
        }

        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        info!(count = events.len(), "detected events in video");
        events
    }

    async fn analyze_batch(&self, frames: &[Frame]) -> Result<Vec<Event>, Error> {
        let messages = build_vision_messages(frames);
        let reply = self.model.generate(&messages).await?;

        Ok(match decode_events(&reply, frames) {
            Some(events) => events,
            None => {
                warn!("could not parse events from model reply, using fallback");
                fallback_events(frames)
            }
        })
    }
}

/// Build the vision-model request for one batch of frames: instructions,
/// the timestamp list, then each frame as an inline data-URL image.
pub fn build_vision_messages(frames: &[Frame]) -> Vec<serde_json::Value> {
    let timestamps = frames
        .iter()
        .map(|f| format!("{:.1}s", f.timestamp))
        .collect::<Vec<_>>()
        .join(", ");

    let mut content = vec![serde_json::json!({
        "type": "text",
        "text": format!(
            "Analyze these {} frames from a video. The timestamps are: {timestamps}",
            frames.len()
        ),
    })];
    for frame in frames {
        content.push(serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/jpeg;base64,{}", frame.image) },
        }));
    }

    vec![
        serde_json::json!({ "role": "system", "content": VISION_SYSTEM_PROMPT }),
        serde_json::json!({ "role": "user", "content": content }),
    ]
}

/// Extract the JSON event array embedded in a free-form model reply.
///
/// Returns `None` when no parseable array is present; callers fall back to
/// generic per-frame events. Decoded timestamps are clamped non-negative
/// and each event is tagged with the closest sampled frame.
pub fn decode_events(reply: &str, frames: &[Frame]) -> Option<Vec<Event>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }

    let mut events: Vec<Event> = serde_json::from_str(&reply[start..=end]).ok()?;
    for event in &mut events {
        event.timestamp = event.timestamp.max(0.0);
        event.frame_number = closest_frame(event.timestamp, frames);
    }
    Some(events)
}

/// One generic low-severity scene event per frame.
pub fn fallback_events(frames: &[Frame]) -> Vec<Event> {
    frames
        .iter()
        .map(|frame| Event {
            timestamp: frame.timestamp,
            event_type: "scene".into(),
            description: "Scene captured".into(),
            objects: Vec::new(),
            severity: "low".into(),
            guideline_violation: false,
            violation_details: None,
            confidence: None,
            frame_number: Some(frame.frame_number),
        })
        .collect()
}

fn closest_frame(timestamp: f64, frames: &[Frame]) -> Option<u64> {
    frames
        .iter()
        .min_by(|a, b| {
            (a.timestamp - timestamp)
                .abs()
                .total_cmp(&(b.timestamp - timestamp).abs())
        })
        .map(|frame| frame.frame_number)
}

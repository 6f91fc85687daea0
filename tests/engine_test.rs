use async_trait::async_trait;
use chrono::TimeDelta;
use std::sync::Arc;
use tokio::sync::RwLock;
use visor::engine::queries::{AnalysisQuery, answer_query, conversation_summary};
use visor::engine::{ChatEngine, FALLBACK_REPLY, build_messages};
use visor::error::Error;
use visor::provider::CompletionModel;
use visor::session::SessionStore;
use visor::types::{Event, GuidelineReport, Message, Role, VideoAnalysis, Violation};

struct CannedModel {
    reply: Option<String>,
}

#[async_trait]
impl CompletionModel for CannedModel {
    async fn generate(&self, _messages: &[serde_json::Value]) -> Result<String, Error> {
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(Error::upstream("timed out")),
        }
    }
}

fn engine(reply: Option<&str>) -> ChatEngine {
    ChatEngine::new(Arc::new(CannedModel {
        reply: reply.map(String::from),
    }))
}

fn store() -> RwLock<SessionStore> {
    RwLock::new(SessionStore::new(10, TimeDelta::minutes(30)))
}

fn red_light_analysis() -> VideoAnalysis {
    let event = Event {
        timestamp: 5.2,
        event_type: "violation".into(),
        description: "car ran the red light at the intersection".into(),
        objects: vec!["car".into(), "traffic_light".into()],
        severity: "high".into(),
        guideline_violation: true,
        violation_details: Some("ran red light".into()),
        confidence: Some(0.95),
        frame_number: Some(156),
    };
    let guidelines = GuidelineReport {
        total_events: 1,
        violations_count: 1,
        high_severity_count: 1,
        medium_severity_count: 0,
        violation_rate: 1.0,
        violations: vec![Violation {
            timestamp: 5.2,
            description: "ran red light".into(),
            severity: "high".into(),
        }],
        compliance_status: "Needs Attention".into(),
    };
    VideoAnalysis {
        events: vec![event],
        summary: "A car ran the red light at 5.2s.".into(),
        summary_failed: false,
        guidelines,
        analyzed_at: chrono::Utc::now(),
    }
}

// =============================================================
// Chat turns
// =============================================================

#[tokio::test]
async fn turn_commits_user_and_assistant_messages() {
    let store = store();
    let id = store.write().await.create();
    let engine = engine(Some("There was one violation at 5.2 seconds."));

    let reply = engine
        .process_message(&store, &id, "Were there any violations?")
        .await
        .expect("reply");
    assert_eq!(reply, "There was one violation at 5.2 seconds.");

    let mut guard = store.write().await;
    let history = guard.history(&id, None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "Were there any violations?");
    assert_eq!(history[1].role, Role::Assistant);

    // Topic tags derived from the user text.
    let context = guard.context(&id);
    let topics = context.get("current_topics").expect("topics set");
    assert_eq!(topics, &serde_json::json!(["safety"]));
}

#[tokio::test]
async fn failed_generation_returns_apology_without_committing() {
    let store = store();
    let id = store.write().await.create();
    let engine = engine(None);

    let reply = engine
        .process_message(&store, &id, "hello?")
        .await
        .expect("recovered reply");
    assert_eq!(reply, FALLBACK_REPLY);

    // The user message stands; no assistant message was committed.
    let history = store.write().await.history(&id, None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let store = store();
    let engine = engine(Some("unused"));

    let err = engine
        .process_message(&store, "no-such-session", "hi")
        .await
        .expect_err("should be absent");
    assert!(matches!(err, Error::NotFound));
}

#[tokio::test]
async fn red_light_scenario_answers_with_timestamp() {
    let store = store();
    let id = store.write().await.create();

    {
        let mut guard = store.write().await;
        guard.append_message(&id, Role::User, "When did the car run the red light?", None);
        let analysis = red_light_analysis();
        guard.store_analysis(
            &id,
            analysis.events,
            analysis.summary,
            false,
            analysis.guidelines,
        );
    }

    let analysis = store.write().await.analysis(&id);
    let answer = answer_query(analysis.as_ref(), &AnalysisQuery::ViolationDetails);
    assert!(answer.contains("5.2"));
    assert!(answer.contains("ran red light"));
}

// =============================================================
// Prompt assembly
// =============================================================

#[test]
fn prompt_embeds_analysis_context() {
    let history = vec![Message::new(Role::User, "current question", None)];
    let analysis = red_light_analysis();
    let messages = build_messages(&history, Some(&analysis), "current question");

    let system = messages[0]["content"].as_str().expect("system text");
    assert!(system.contains("A car ran the red light at 5.2s."));
    assert!(system.contains("Total Events: 1"));
    assert!(system.contains("Guideline Compliance: Needs Attention"));
    assert!(system.contains("[5.2s]"));

    // The current message appears exactly once, at the end.
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "current question");
}

#[test]
fn prompt_includes_prior_turns_but_not_system_history() {
    let history = vec![
        Message::new(Role::System, "internal note", None),
        Message::new(Role::User, "first question", None),
        Message::new(Role::Assistant, "first answer", None),
        Message::new(Role::User, "second question", None),
    ];
    let messages = build_messages(&history, None, "second question");

    // system prompt + 2 prior turns + current message
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1]["content"], "first question");
    assert_eq!(messages[2]["content"], "first answer");
    assert_eq!(messages[3]["content"], "second question");
    assert!(
        !messages
            .iter()
            .any(|m| m["content"] == "internal note")
    );
}

// =============================================================
// Typed queries
// =============================================================

#[test]
fn query_without_analysis_says_so() {
    let answer = answer_query(None, &AnalysisQuery::ViolationDetails);
    assert!(answer.contains("No video has been analyzed"));
}

#[test]
fn event_at_time_uses_two_second_window() {
    let analysis = red_light_analysis();

    let hit = answer_query(
        Some(&analysis),
        &AnalysisQuery::EventAtTime { timestamp: 6.0 },
    );
    assert!(hit.contains("5.2"));

    let miss = answer_query(
        Some(&analysis),
        &AnalysisQuery::EventAtTime { timestamp: 20.0 },
    );
    assert!(miss.contains("No events found around 20"));
}

#[test]
fn event_summary_filters_by_type() {
    let analysis = red_light_analysis();

    let hit = answer_query(
        Some(&analysis),
        &AnalysisQuery::EventSummary {
            event_type: "violation".into(),
        },
    );
    assert!(hit.contains("Found 1 violation events"));

    let miss = answer_query(
        Some(&analysis),
        &AnalysisQuery::EventSummary {
            event_type: "pedestrian".into(),
        },
    );
    assert!(miss.contains("No pedestrian events found"));
}

#[test]
fn conversation_summary_counts_exchanges_and_topics() {
    let history = vec![
        Message::new(Role::User, "When did the violation happen?", None),
        Message::new(Role::Assistant, "At 5.2 seconds.", None),
        Message::new(Role::User, "Give me a summary.", None),
    ];
    let summary = conversation_summary(&history);
    assert!(summary.contains("Total exchanges: 2"));
    assert!(summary.contains("violations"));
    assert!(summary.contains("summary"));

    assert!(conversation_summary(&[]).contains("No conversation history"));
}

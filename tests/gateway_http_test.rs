use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use visor::config::VisorConfig;
use visor::error::Error;
use visor::gateway::{AppState, serve};
use visor::provider::CompletionModel;
use visor::types::Frame;
use visor::video::FrameSource;

struct CannedModel {
    reply: String,
}

#[async_trait]
impl CompletionModel for CannedModel {
    async fn generate(&self, _messages: &[serde_json::Value]) -> Result<String, Error> {
        Ok(self.reply.clone())
    }
}

struct StubFrameSource;

#[async_trait]
impl FrameSource for StubFrameSource {
    async fn extract(&self, _path: &Path) -> Result<Vec<Frame>, Error> {
        Ok(vec![
            Frame {
                frame_number: 0,
                timestamp: 0.0,
                image: "aGVsbG8=".into(),
                width: 640,
                height: 480,
            },
            Frame {
                frame_number: 30,
                timestamp: 2.0,
                image: "d29ybGQ=".into(),
                width: 640,
                height: 480,
            },
        ])
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

/// Spin up a gateway with canned models on an ephemeral port.
fn spawn_gateway(port: u16, model_reply: &str) -> tokio::task::JoinHandle<()> {
    let mut config = VisorConfig::default();
    config.gateway.port = port;

    let model: Arc<dyn CompletionModel> = Arc::new(CannedModel {
        reply: model_reply.to_string(),
    });
    let state = Arc::new(AppState::new(
        config,
        model.clone(),
        model,
        Arc::new(StubFrameSource),
    ));

    tokio::spawn(async move {
        let _ = serve(state).await;
    })
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    for _ in 0..80 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }

    panic!("gateway did not become healthy at {url}");
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("health response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "ok");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn chat_creates_session_and_replies() {
    let port = free_port();
    let gateway = spawn_gateway(port, "The light turned red at 5.2s.");
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .json(&serde_json::json!({ "message": "What happened?" }))
        .send()
        .await
        .expect("chat response")
        .json()
        .await
        .expect("chat body");

    assert_eq!(body["response"], "The light turned red at 5.2s.");
    assert_eq!(body["context_retained"], true);
    let session_id = body["session_id"].as_str().expect("session id");
    assert!(!session_id.is_empty());

    // Second turn on the same session accumulates history.
    let _ = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .json(&serde_json::json!({ "message": "And then?", "session_id": session_id }))
        .send()
        .await
        .expect("second chat");

    let session: serde_json::Value = client
        .get(format!("http://127.0.0.1:{port}/api/sessions/{session_id}"))
        .send()
        .await
        .expect("session response")
        .json()
        .await
        .expect("session body");
    assert_eq!(session["history"].as_array().expect("history").len(), 4);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn chat_with_unknown_session_is_not_found() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .json(&serde_json::json!({ "message": "hello", "session_id": "missing" }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn empty_chat_message_is_rejected() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .json(&serde_json::json!({ "message": "   " }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn get_unknown_session_is_not_found() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/api/sessions/nope"))
        .await
        .expect("session response");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn delete_session_is_idempotent() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .delete(format!("http://127.0.0.1:{port}/api/sessions/whatever"))
            .send()
            .await
            .expect("delete response");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn video_upload_returns_events_and_report() {
    let port = free_port();
    // The canned model replies with a parseable event array for the vision
    // call; the same text then stands in as the chat model's summary.
    let gateway = spawn_gateway(
        port,
        r#"[{"timestamp": 5.2, "description": "car ran red light",
             "severity": "high", "guideline_violation": true,
             "violation_details": "ran red light"}]"#,
    );
    wait_for_health(port).await;

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![0u8; 128]).file_name("clip.mp4"),
    );

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/api/videos"))
        .multipart(form)
        .send()
        .await
        .expect("upload response")
        .json()
        .await
        .expect("upload body");

    let session_id = body["session_id"].as_str().expect("session id");
    assert!(!session_id.is_empty());
    let events = body["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["timestamp"], 5.2);
    assert_eq!(body["guideline_adherence"]["violations_count"], 1);
    assert_eq!(
        body["guideline_adherence"]["compliance_status"],
        "Needs Attention"
    );
    assert_eq!(body["summary_failed"], false);

    // The analysis is attached to the session.
    let session: serde_json::Value = client
        .get(format!("http://127.0.0.1:{port}/api/sessions/{session_id}"))
        .send()
        .await
        .expect("session response")
        .json()
        .await
        .expect("session body");
    assert_eq!(
        session["analysis"]["events"].as_array().expect("events").len(),
        1
    );

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn video_upload_with_bad_extension_is_rejected() {
    let port = free_port();
    let gateway = spawn_gateway(port, "hi");
    wait_for_health(port).await;

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![0u8; 16]).file_name("clip.gif"),
    );

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/api/videos"))
        .multipart(form)
        .send()
        .await
        .expect("upload response");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn export_returns_full_session_json() {
    let port = free_port();
    let gateway = spawn_gateway(port, "noted");
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .json(&serde_json::json!({ "message": "remember this" }))
        .send()
        .await
        .expect("chat response")
        .json()
        .await
        .expect("chat body");
    let session_id = body["session_id"].as_str().expect("session id");

    let response = client
        .get(format!(
            "http://127.0.0.1:{port}/api/sessions/{session_id}/export"
        ))
        .send()
        .await
        .expect("export response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let exported: serde_json::Value =
        serde_json::from_str(&response.text().await.expect("export body")).expect("export json");
    assert_eq!(exported["id"], session_id);
    assert_eq!(exported["history"].as_array().expect("history").len(), 2);

    gateway.abort();
    let _ = gateway.await;
}

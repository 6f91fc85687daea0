use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::analysis::EventDetector;
use crate::analysis::report::Summarizer;
use crate::config::VisorConfig;
use crate::engine::ChatEngine;
use crate::error::Error;
use crate::provider::{CompletionModel, OpenAiCompatModel};
use crate::session::{Session, SessionStore};
use crate::types::{Event, GuidelineReport};
use crate::video::{FfmpegFrameSource, FrameSource};

pub struct AppState {
    pub store: RwLock<SessionStore>,
    pub engine: ChatEngine,
    pub detector: EventDetector,
    pub summarizer: Summarizer,
    pub frames: Arc<dyn FrameSource>,
    pub config: VisorConfig,
    /// Per-session locks serializing whole chat/analysis turns.
    pub session_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        config: VisorConfig,
        chat_model: Arc<dyn CompletionModel>,
        vision_model: Arc<dyn CompletionModel>,
        frames: Arc<dyn FrameSource>,
    ) -> Self {
        Self {
            store: RwLock::new(SessionStore::from_config(&config.session)),
            engine: ChatEngine::new(chat_model.clone()),
            detector: EventDetector::new(vision_model),
            summarizer: Summarizer::new(chat_model),
            frames,
            config,
            session_locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.session_locks.read().await;
            if let Some(lock) = locks.get(session_id) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.session_locks.write().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build providers from config and serve.
pub async fn run(config: VisorConfig) -> anyhow::Result<()> {
    let chat_model: Arc<dyn CompletionModel> =
        Arc::new(OpenAiCompatModel::chat(&config.models));
    let vision_model: Arc<dyn CompletionModel> =
        Arc::new(OpenAiCompatModel::vision(&config.models));
    let frames: Arc<dyn FrameSource> = Arc::new(FfmpegFrameSource::new(&config.video));

    if config.models.api_key.is_none() {
        warn!("no model API key configured — model calls will fail");
    }

    let state = Arc::new(AppState::new(config, chat_model, vision_model, frames));
    serve(state).await
}

/// Serve an already-built state. Split from [`run`] so tests can inject
/// mock models and frame sources.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.gateway.bind, state.config.gateway.port
    );

    spawn_sweeper(state.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("visor gateway listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.video.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/api/videos", post(upload_video))
        .route("/api/chat", post(chat))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/export", get(export_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodic expiry sweep. Lazy per-access eviction and this sweep converge
/// on the same remove-if-expired primitive, so running both is safe.
fn spawn_sweeper(state: Arc<AppState>) {
    let period = std::time::Duration::from_secs(state.config.session.sweep_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let mut store = state.store.write().await;
            store.sweep_expired();
            // Drop locks for sessions that no longer exist.
            let live: Vec<String> = store.sessions_mut().keys().cloned().collect();
            drop(store);
            let mut locks = state.session_locks.write().await;
            locks.retain(|id, _| live.contains(id));
        }
    });
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    session_id: String,
    context_retained: bool,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, Error> {
    if request.message.trim().is_empty() {
        return Err(Error::validation("message must not be empty"));
    }

    let session_id = match request.session_id {
        Some(id) => id,
        None => state.store.write().await.create(),
    };

    let lock = state.session_lock(&session_id).await;
    let _guard = lock.lock().await;

    let reply = state
        .engine
        .process_message(&state.store, &session_id, &request.message)
        .await?;

    Ok(Json(ChatResponse {
        response: reply,
        session_id,
        context_retained: true,
    }))
}

#[derive(Serialize)]
struct VideoAnalysisResponse {
    session_id: String,
    events: Vec<Event>,
    summary: String,
    summary_failed: bool,
    guideline_adherence: GuidelineReport,
}

async fn upload_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<VideoAnalysisResponse>, Error> {
    let mut session_id: Option<String> = None;
    let mut filename = String::from("upload");
    let mut payload: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                if let Some(name) = field.file_name() {
                    filename = name.to_string();
                }
                payload = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| Error::validation(format!("unreadable upload: {e}")))?,
                );
            }
            Some("session_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("unreadable session_id: {e}")))?;
                if !text.is_empty() {
                    session_id = Some(text);
                }
            }
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| Error::validation("missing video file"))?;
    crate::video::validate_upload(&filename, &payload)?;

    // A supplied session must exist before we spend time on analysis.
    if let Some(id) = &session_id
        && state.store.write().await.get(id).is_none()
    {
        return Err(Error::NotFound);
    }

    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_ascii_lowercase();
    let temp_path =
        std::env::temp_dir().join(format!("visor-{}.{extension}", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp_path, &payload)
        .await
        .map_err(|e| Error::upstream(format!("failed to stage upload: {e}")))?;

    let extracted = state.frames.extract(&temp_path).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    let frames = extracted?;

    info!(frames = frames.len(), "processing video {filename}");
    let events = state.detector.detect_events(&frames).await;
    let (summary, summary_failed, report) = state.summarizer.summarize(&events).await;

    let session_id = match session_id {
        Some(id) => id,
        None => state.store.write().await.create(),
    };

    let lock = state.session_lock(&session_id).await;
    let _guard = lock.lock().await;
    {
        let mut store = state.store.write().await;
        if store.get(&session_id).is_none() {
            // Expired while the models were running.
            return Err(Error::NotFound);
        }
        store.store_analysis(
            &session_id,
            events.clone(),
            summary.clone(),
            summary_failed,
            report.clone(),
        );
    }

    Ok(Json(VideoAnalysisResponse {
        session_id,
        events,
        summary,
        summary_failed,
        guideline_adherence: report,
    }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, Error> {
    state
        .store
        .write()
        .await
        .snapshot(&id)
        .map(Json)
        .ok_or(Error::NotFound)
}

async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, Error> {
    let exported = state
        .store
        .write()
        .await
        .export(&id)
        .ok_or(Error::NotFound)?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        exported,
    )
        .into_response())
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    state.store.write().await.delete(&id);
    state.session_locks.write().await.remove(&id);
    Json(serde_json::json!({ "message": "Session cleared successfully" }))
}

//! Admin Surface: HTTP + WS control plane for inspecting,
//! pausing, resuming, and editing live sessions and workflow definitions.
//!
//! Grounded on `examples/sblanchard-SerialAgent/crates/gateway/src/api/router.rs`
//! for the axum router/handler shape and `.../api/admin/guard.rs` +
//! `.../nodes/ws.rs` for the auth patterns threaded through [`auth::AdminGuard`]
//! and the debug-stream upgrade handler below.

pub mod auth;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::debug::BroadcasterRegistry;
use crate::session::Session;
use crate::workflow::loader::save_workflow_jsonl;
use crate::workflow::validate::validate;
use crate::workflow::{Workflow, WorkflowState, PATCHABLE_FIELDS};

use auth::{valid_path_param, AdminGuard};

/// Live-mutable runtime settings ("Live-mutable runtime settings").
/// Readers do not snapshot these — VAD thresholds in particular are read
/// every poll to honour changes made mid-call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub barge_in_enabled: bool,
    pub barge_in_energy_threshold: f64,
    pub barge_in_confirm_frames: u32,
    pub vad_energy_threshold: f64,
    pub vad_speech_confirm_frames: u32,
    pub vad_silence_gap: u32,
    pub tts_voice: String,
    pub tts_engine: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            barge_in_enabled: true,
            barge_in_energy_threshold: 800.0,
            barge_in_confirm_frames: 5,
            vad_energy_threshold: 300.0,
            vad_speech_confirm_frames: 1,
            vad_silence_gap: 8,
            tts_voice: "default".to_string(),
            tts_engine: "default".to_string(),
        }
    }
}

/// Shared state handed to every admin handler. One instance per process.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dashmap::DashMap<String, Arc<Session>>>,
    pub broadcasters: Arc<BroadcasterRegistry>,
    pub workflows: Arc<dashmap::DashMap<String, Arc<Workflow>>>,
    pub workflow_dir: PathBuf,
    pub settings: Arc<parking_lot::RwLock<RuntimeSettings>>,
    pub admin_token_hash: Option<Vec<u8>>,
    pub allow_unauthenticated_admin: bool,
}

impl AppState {
    pub fn new(workflow_dir: PathBuf, admin_token: Option<&str>, allow_unauthenticated_admin: bool) -> Self {
        Self {
            sessions: Arc::new(dashmap::DashMap::new()),
            broadcasters: Arc::new(BroadcasterRegistry::new()),
            workflows: Arc::new(dashmap::DashMap::new()),
            workflow_dir,
            settings: Arc::new(parking_lot::RwLock::new(RuntimeSettings::default())),
            admin_token_hash: admin_token.map(|t| Sha256::digest(t.as_bytes()).to_vec()),
            allow_unauthenticated_admin,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/config", get(get_config).patch(patch_config))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/pause", post(pause_session))
        .route("/sessions/:id/resume", post(resume_session))
        .route("/workflow/:id", get(get_workflow).put(put_workflow))
        .route("/workflow/:id/states/:state_id", patch(patch_workflow_state))
        .route("/sessions/:id/debug", get(debug_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn get_config(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    Json(state.settings.read().clone()).into_response()
}

async fn patch_config(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Response {
    let Some(patch_obj) = patch.as_object() else {
        return api_error(StatusCode::BAD_REQUEST, "patch body must be a JSON object");
    };

    let mut settings = state.settings.write();
    let mut merged = serde_json::to_value(&*settings).unwrap();
    let merged_obj = merged.as_object_mut().unwrap();
    for (key, value) in patch_obj {
        if merged_obj.contains_key(key) {
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    match serde_json::from_value::<RuntimeSettings>(merged) {
        Ok(updated) => {
            *settings = updated.clone();
            Json(updated).into_response()
        }
        Err(e) => api_error(StatusCode::BAD_REQUEST, format!("invalid settings: {e}")),
    }
}

async fn list_sessions(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    // Collect owned handles before awaiting so no DashMap shard guard is
    // held across a suspension point.
    let sessions: Vec<Arc<Session>> = state.sessions.iter().map(|e| e.value().clone()).collect();
    let mut summaries = Vec::with_capacity(sessions.len());
    for session in &sessions {
        summaries.push(session.snapshot(false).await);
    }
    Json(summaries).into_response()
}

async fn get_session(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid session id");
    }
    let Some(session) = state.sessions.get(&id).map(|e| e.value().clone()) else {
        return api_error(StatusCode::NOT_FOUND, "no such session");
    };
    Json(session.snapshot(true).await).into_response()
}

async fn pause_session(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid session id");
    }
    let Some(session) = state.sessions.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "no such session");
    };
    session.pause();
    if let Some(broadcaster) = state.broadcasters.get(&id) {
        broadcaster.emit("pause", None, serde_json::json!({}));
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn resume_session(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid session id");
    }
    let Some(session) = state.sessions.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "no such session");
    };
    session.resume();
    if let Some(broadcaster) = state.broadcasters.get(&id) {
        broadcaster.emit("resume", None, serde_json::json!({}));
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn get_workflow(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid workflow id");
    }
    match state.workflows.get(&id) {
        Some(workflow) => Json(workflow.as_ref().clone()).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "no such workflow"),
    }
}

/// Whole-workflow replace: re-validates and persists to JSONL before
/// swapping the in-memory registry entry.
async fn put_workflow(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Workflow>,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid workflow id");
    }
    if body.id != id {
        return api_error(StatusCode::BAD_REQUEST, "workflow id in body must match path");
    }
    if let Err(e) = validate(&body) {
        return api_error(StatusCode::BAD_REQUEST, format!("invalid workflow: {e}"));
    }

    let path = state.workflow_dir.join(format!("{id}.jsonl"));
    if let Err(e) = save_workflow_jsonl(&body, &path) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to persist workflow: {e}"));
    }

    state.workflows.insert(id, Arc::new(body.clone()));
    Json(body).into_response()
}

/// Patches a single state's allowlisted fields, re-validates the whole
/// workflow, and persists ("Patch bodies are intersected with
/// the workflow-field allowlist").
async fn patch_workflow_state(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path((id, state_id)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Response {
    if !valid_path_param(&id) || !valid_path_param(&state_id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid session or workflow path parameter");
    }
    let Some(patch_obj) = patch.as_object() else {
        return api_error(StatusCode::BAD_REQUEST, "patch body must be a JSON object");
    };

    let Some(current) = state.workflows.get(&id).map(|w| w.as_ref().clone()) else {
        return api_error(StatusCode::NOT_FOUND, "no such workflow");
    };

    let mut updated = current;
    let Some(target_state) = updated.states.get(&state_id).cloned() else {
        return api_error(StatusCode::NOT_FOUND, "no such state in this workflow");
    };

    let mut state_value = serde_json::to_value(&target_state).unwrap();
    let state_obj = state_value.as_object_mut().unwrap();
    for (key, value) in patch_obj {
        if PATCHABLE_FIELDS.contains(&key.as_str()) {
            state_obj.insert(key.clone(), value.clone());
        }
    }

    let patched_state: WorkflowState = match serde_json::from_value(state_value) {
        Ok(s) => s,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("invalid state patch: {e}")),
    };

    updated.states.insert(state_id, patched_state);
    if let Err(e) = validate(&updated) {
        return api_error(StatusCode::BAD_REQUEST, format!("patch would invalidate workflow: {e}"));
    }

    let path = state.workflow_dir.join(format!("{id}.jsonl"));
    if let Err(e) = save_workflow_jsonl(&updated, &path) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to persist workflow: {e}"));
    }

    state.workflows.insert(id, Arc::new(updated.clone()));
    Json(updated).into_response()
}

#[derive(Deserialize)]
struct DebugWsQuery {
    #[serde(default)]
    token: String,
}

fn token_authorized(state: &AppState, token: &str) -> bool {
    match &state.admin_token_hash {
        Some(expected) => {
            let provided = Sha256::digest(token.as_bytes());
            bool::from(provided.as_slice().ct_eq(expected.as_slice()))
        }
        None => state.allow_unauthenticated_admin,
    }
}

/// WS close code sent when admin WebSocket authentication fails.
const WS_CLOSE_AUTH_FAILED: u16 = 4001;

/// Streams one session's [`DebugEvent`](crate::debug::DebugEvent) log as WS
/// text frames, one writer per subscriber queue. The browser
/// WebSocket API cannot set an Authorization header, so the token travels
/// as a query parameter here instead of via [`AdminGuard`].
async fn debug_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DebugWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !valid_path_param(&id) {
        return api_error(StatusCode::BAD_REQUEST, "invalid session id");
    }
    if !token_authorized(&state, &query.token) {
        return ws.on_upgrade(close_unauthorized);
    }
    let Some(broadcaster) = state.broadcasters.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "no such session");
    };
    ws.on_upgrade(move |socket| stream_debug_events(socket, broadcaster))
}

async fn close_unauthorized(mut socket: WebSocket) {
    use axum::extract::ws::CloseFrame;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: WS_CLOSE_AUTH_FAILED,
            reason: "invalid or missing admin token".into(),
        })))
        .await;
}

async fn stream_debug_events(mut socket: WebSocket, broadcaster: crate::debug::DebugBroadcaster) {
    let mut subscription = broadcaster.subscribe();
    while let Some(event) = subscription.recv().await {
        let Ok(text) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

/**
 * HTTP API - Event stream and memo endpoint
 *
 * ROUTES:
 * - GET  /health         : liveness, plain "ok"
 * - GET  /system/health  : KernelHealth as JSON
 * - GET  /snapshot       : last sampled fleet snapshot (no broadcast)
 * - GET  /stream         : text/event-stream, one full message first, then
 *                          whatever the scheduler and memo writes broadcast
 * - POST /api/memo       : {nodeId, gpuId, text, editor?} -> {success: true}
 *
 * ERRORS:
 * - 400 {"error":"Invalid request"} on a malformed memo body
 * - 500 {"error": ...} when the memo store fails
 *
 * Viewers are browsers on other origins, CORS is wide open (GET/POST/OPTIONS).
 */

use crate::dashboard::SharedDashboard;
use crate::health::{HealthTracker, KernelHealth};
use crate::hub::ChannelId;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clustil_protocol::{DeviceKey, MemoAck, MemoWrite, Snapshot};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub dashboard: SharedDashboard,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/snapshot", get(get_snapshot))
        .route("/stream", get(stream_updates))
        .route("/api/memo", post(post_memo))
        .with_state(app_state)
        .layer(cors)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let dashboard = app.dashboard.lock();
    Json(app.health.get_health(&dashboard))
}

// GET /snapshot
async fn get_snapshot(State(app): State<AppState>) -> Json<Snapshot> {
    Json(app.dashboard.lock().snapshot())
}

/// Unregisters the viewer once axum drops the response stream.
struct ChannelGuard {
    id: ChannelId,
    dashboard: SharedDashboard,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.dashboard.lock().disconnect(&self.id);
    }
}

// GET /stream
async fn stream_updates(
    State(app): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let connected = app.dashboard.lock().connect();
    let (id, rx) = connected.map_err(|e| {
        error!("failed to open viewer channel: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let guard = ChannelGuard {
        id,
        dashboard: app.dashboard.clone(),
    };

    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let payload = rx.recv().await?;
        Some((Ok(Event::default().data(payload)), (rx, guard)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn invalid_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid request" }))).into_response()
}

/// Accepts the body only when both ids are non-empty strings and `text` is a string.
fn parse_memo_write(body: &Value) -> Option<MemoWrite> {
    let non_empty = |field: &str| {
        body.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(MemoWrite {
        node_id: non_empty("nodeId")?,
        gpu_id: non_empty("gpuId")?,
        text: body.get("text")?.as_str()?.to_string(),
        editor: non_empty("editor"),
    })
}

// POST /api/memo
async fn post_memo(State(app): State<AppState>, payload: Result<Json<Value>, JsonRejection>) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("memo body rejected: {rejection}");
            return invalid_request();
        }
    };
    let Some(write) = parse_memo_write(&body) else {
        warn!("memo body missing fields: {body}");
        return invalid_request();
    };

    let key = DeviceKey::new(write.node_id, write.gpu_id);
    let result = app
        .dashboard
        .lock()
        .write_memo(key, &write.text, write.editor.as_deref());
    match result {
        Ok(_) => Json(MemoAck { success: true }).into_response(),
        Err(e) => {
            error!("memo write failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

//! API Routes

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use uuid::Uuid;

use crate::camera_source::{CameraSource, FrameTransform};
use crate::error::{Error, Result};
use crate::models::ProofResponse;
use crate::relay::MULTIPART_BOUNDARY;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Stream
        .route("/stream", get(camera_stream))
        .route("/stream/", get(camera_stream))
        .route("/stream/proof", get(stream_proof))
        .route("/stream/proof/", get(stream_proof))
        .route("/stream/control", post(stream_control))
        .route("/stream/control/", post(stream_control))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    url: Option<String>,
    gray: Option<String>,
    width: Option<String>,
    client: Option<String>,
}

/// `GET /stream/?url=...&gray=1&width=640&client=abc`
///
/// Multipart MJPEG feed for a single viewer. The resolved session id is
/// echoed in `X-Stream-Client` so the viewer can address control actions
/// at this specific stream.
async fn camera_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> Result<Response> {
    let source = CameraSource::resolve(q.url.as_deref(), state.config.camera_url.as_deref())?;

    let gray = matches!(q.gray.as_deref(), Some("1") | Some("true") | Some("True"));
    // Unparseable width values are ignored, matching lenient query handling.
    let width = q.width.as_deref().and_then(|w| w.parse::<u32>().ok());
    let transform = FrameTransform::new(gray, width);
    let client = q.client.filter(|c| !c.is_empty());

    let stream = state
        .coordinator
        .open_stream(source, transform, client)
        .await?;

    let body = Body::from_stream(ReceiverStream::new(stream.frames).map(Ok::<_, Infallible>));

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MULTIPART_BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::PRAGMA, "no-cache")
        .header("X-Accel-Buffering", "no")
        .header("X-Stream-Client", stream.client_id.as_str())
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct ControlParams {
    action: Option<String>,
    #[serde(alias = "client_id")]
    client: Option<String>,
}

/// `POST /stream/control/` with `action` in {ack, stop}
///
/// Accepts JSON or form bodies, with query parameters as fallback.
async fn stream_control(
    State(state): State<AppState>,
    Query(query): Query<ControlParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let from_body = parse_control_body(&headers, &body);
    let action = from_body.action.or(query.action);
    let client = from_body
        .client
        .or(query.client)
        .filter(|c| !c.is_empty());

    let Some(client) = client else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing client"})),
        )
            .into_response();
    };

    let registry = state.coordinator.registry();
    match action.as_deref() {
        Some("stop") => {
            let stopped = registry.force_stop(&client);
            Json(json!({"ok": stopped, "stopped": stopped})).into_response()
        }
        Some("ack") => {
            let active = registry.touch_ack(&client);
            Json(json!({"ok": active, "active": active})).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported action"})),
        )
            .into_response(),
    }
}

fn parse_control_body(headers: &HeaderMap, body: &Bytes) -> ControlParams {
    if body.is_empty() {
        return ControlParams::default();
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/json") {
        serde_json::from_slice(body).unwrap_or_default()
    } else {
        serde_urlencoded::from_bytes(body).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ProofQuery {
    url: Option<String>,
    client: Option<String>,
}

/// `GET /stream/proof/?url=...`
///
/// Signed origin proof for the resolved source, without leaking the URL.
async fn stream_proof(
    State(state): State<AppState>,
    Query(q): Query<ProofQuery>,
) -> Result<Json<ProofResponse>> {
    let source = CameraSource::resolve(q.url.as_deref(), state.config.camera_url.as_deref())?;

    let signature = hex::encode(Sha256::digest(source.as_str().as_bytes()));

    Ok(Json(ProofResponse {
        via_backend: true,
        client_id: q.client.filter(|c| !c.is_empty()),
        request_id: Uuid::new_v4().simple().to_string(),
        server_time: Utc::now().to_rfc3339(),
        camera_protocol: source.scheme().to_string(),
        camera_host: source.host().map(str::to_string),
        camera_signature: signature,
    }))
}

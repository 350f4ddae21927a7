use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use dispatcher_client::StatusSnapshot;

use crate::data_tracker::DataTracker;

/// Batch size the dispatch endpoint hands out per `GET /work` call.
/// spec.md doesn't make this configurable at the HTTP layer; one item per
/// request keeps the wire contract simple and matches the client's
/// single-item `get_work()`.
const HTTP_BATCH_SIZE: usize = 1;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WorkResponseBody {
    Work { work_id: u64, content: String },
    AllWorkComplete,
    ServerUnavailable,
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    work_id: u64,
    result: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AckResponseBody {
    Ok,
}

#[derive(Clone)]
struct AppState {
    tracker: Arc<DataTracker>,
    shutting_down: Arc<AtomicBool>,
}

/// Builds the dispatch router (spec.md §4.5), generalized from the
/// teacher's plain request/response handlers into an `axum` service. The
/// returned `Arc<AtomicBool>` is flipped by the caller once graceful
/// shutdown begins; requests that land afterwards get `503`.
pub fn router(tracker: Arc<DataTracker>) -> (Router, Arc<AtomicBool>) {
    let shutting_down = Arc::new(AtomicBool::new(false));
    let state = AppState {
        tracker,
        shutting_down: shutting_down.clone(),
    };
    let router = Router::new()
        .route("/work", get(get_work))
        .route("/result", post(submit_result))
        .route("/status", get(get_status))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    (router, shutting_down)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_work(State(state): State<AppState>) -> Response {
    if state.shutting_down.load(Ordering::Acquire) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WorkResponseBody::ServerUnavailable),
        )
            .into_response();
    }

    match state.tracker.get_work_batch(HTTP_BATCH_SIZE) {
        Ok(Some(mut items)) => {
            let (work_id, content) = items.remove(0);
            Json(WorkResponseBody::Work { work_id, content }).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, Json(WorkResponseBody::AllWorkComplete)).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "get_work_batch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn submit_result(State(state): State<AppState>, Json(body): Json<ResultRequest>) -> Response {
    if state.shutting_down.load(Ordering::Acquire) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WorkResponseBody::ServerUnavailable),
        )
            .into_response();
    }
    if body.result.contains('\n') {
        return (
            StatusCode::BAD_REQUEST,
            "result must not contain embedded newlines",
        )
            .into_response();
    }

    match state
        .tracker
        .complete_work_batch(vec![(body.work_id, body.result)])
    {
        Ok(()) => Json(AckResponseBody::Ok).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "complete_work_batch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.tracker.stats().into())
}

//! HTTP handlers for pipeline traces
//!
//! - GET /inspect/:messageId        runs and ordered steps for a message
//! - GET /pipeline-runs             recent runs (limit, default 50)
//! - GET /pipeline-runs/:id         one run with its steps

use crate::error::{Error, Result};
use crate::storage::blocking;
use crate::tracer::store::TraceStore;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Shared state for trace handlers
#[derive(Clone)]
pub struct TracerState {
    pub store: Arc<TraceStore>,
}

pub fn tracer_router(state: TracerState) -> Router {
    Router::new()
        .route("/inspect/:message_id", get(inspect_message))
        .route("/pipeline-runs", get(list_runs))
        .route("/pipeline-runs/:id", get(get_run))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    limit: Option<usize>,
}

/// GET /inspect/:messageId
async fn inspect_message(
    State(state): State<TracerState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    let id = message_id.clone();
    let traces = blocking(move || store.inspect(&id)).await?;
    if traces.is_empty() {
        return Err(Error::NotFound(format!(
            "No pipeline runs for message {}",
            message_id
        )));
    }
    Ok(Json(traces))
}

/// GET /pipeline-runs
async fn list_runs(
    State(state): State<TracerState>,
    Query(params): Query<ListRunsQuery>,
) -> Result<impl IntoResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let store = state.store;
    Ok(Json(blocking(move || store.list_runs(limit)).await?))
}

/// GET /pipeline-runs/:id
async fn get_run(
    State(state): State<TracerState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.get_run(&id)).await?))
}

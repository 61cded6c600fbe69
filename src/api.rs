//! Unified API router for Cogmem
//!
//! Merges all module routers into a single axum `Router` with CORS, request
//! tracing and a consistent error envelope.
//!
//! ## Endpoint Map
//!
//! | Prefix                      | Module       | Description                          |
//! |-----------------------------|--------------|--------------------------------------|
//! | `/health`                   | api          | Liveness probe                       |
//! | `/entities/*`               | graph        | Entities, edges, merge, split, bulk  |
//! | `/predicates/*`             | graph        | Predicate vocabulary                 |
//! | `/validation-rules/*`       | graph        | Per-type entity validation rules     |
//! | `/conversations/:id/*`      | conversation | Message log                          |
//! | `/memory/*`                 | pipeline     | Context, extraction, link prediction |
//! | `/inspect/*`, `/pipeline-runs/*` | tracer  | Pipeline traces                      |
//!
//! ## Error envelope
//!
//! Every failed request answers `{"error": {"code": "...", "message": "..."}}`:
//!
//! | Error          | Status | Code               |
//! |----------------|--------|--------------------|
//! | `Validation`   | 400    | `VALIDATION_ERROR` |
//! | `NotFound`     | 404    | `NOT_FOUND`        |
//! | `Conflict`     | 409    | `CONFLICT`         |
//! | `Upstream`     | 502    | `UPSTREAM_ERROR`   |
//! | `QueueFull`    | 503    | `QUEUE_FULL`       |
//! | anything else  | 500    | `INTERNAL_ERROR`   |

use crate::conversation::{conversation_router, ConversationState};
use crate::error::Error;
use crate::graph::{graph_router, GraphState};
use crate::pipeline::{pipeline_router, PipelineState};
use crate::tracer::{tracer_router, TracerState};
use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete Cogmem HTTP application
///
/// Merges all module routers, adds CORS and request tracing, and returns a
/// single `Router` ready to be served by `axum::serve`.
pub fn build_app(
    graph_state: GraphState,
    conversation_state: ConversationState,
    pipeline_state: PipelineState,
    tracer_state: TracerState,
    cors_origins: &[String],
) -> Router {
    let cors = build_cors(cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .merge(graph_router(graph_state))
        .merge(conversation_router(conversation_state))
        .merge(pipeline_router(pipeline_state))
        .merge(tracer_router(tracer_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message without the variant prefix
    fn public_message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Upstream(m)
            | Self::QueueFull(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        let body = ApiError {
            error: ApiErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Root handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(parsed)
    }
}

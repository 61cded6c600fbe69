//! HTTP handlers for the memory pipelines
//!
//! - POST /memory/context                             assemble context for a turn
//! - POST /memory/pipeline                            queue an extraction (202)
//! - GET  /memory/extract-from-conversation/:id       extract from a whole transcript
//! - GET  /memory/link-prediction/:conversationId     propose a missing edge

use super::context::{ContextAssembler, ContextRequest};
use super::extraction::{finish_run, ExtractionJob, MemoryExtractor};
use super::link_prediction::LinkPredictor;
use super::queue::{ExtractionQueue, ExtractionRequest};
use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::graph::NamespaceId;
use crate::storage::blocking;
use crate::tracer::PipelineType;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Shared state for pipeline handlers
#[derive(Clone)]
pub struct PipelineState {
    pub assembler: Arc<ContextAssembler>,
    pub extractor: Arc<MemoryExtractor>,
    pub queue: ExtractionQueue,
    pub predictor: Arc<LinkPredictor>,
    pub conversations: Arc<ConversationStore>,
}

pub fn pipeline_router(state: PipelineState) -> Router {
    Router::new()
        .route("/memory/context", post(assemble_context))
        .route("/memory/pipeline", post(submit_extraction))
        .route(
            "/memory/extract-from-conversation/:id",
            get(extract_from_conversation),
        )
        .route(
            "/memory/link-prediction/:conversation_id",
            get(predict_link),
        )
        .with_state(state)
}

// =============================================================================
// Context
// =============================================================================

/// POST /memory/context
async fn assemble_context(
    State(state): State<PipelineState>,
    Json(request): Json<ContextRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.assembler.assemble(&request).await?))
}

// =============================================================================
// Extraction
// =============================================================================

/// POST /memory/pipeline
async fn submit_extraction(
    State(state): State<PipelineState>,
    Json(request): Json<ExtractionRequest>,
) -> Result<impl IntoResponse> {
    let run_id = state.queue.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "runId": run_id, "status": "queued" })),
    ))
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    namespace: Option<String>,
}

/// GET /memory/extract-from-conversation/:id
///
/// Runs synchronously over the full transcript, traced under the id of the
/// conversation's latest message.
async fn extract_from_conversation(
    State(state): State<PipelineState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<ExtractQuery>,
) -> Result<impl IntoResponse> {
    let conversations = state.conversations.clone();
    let id = conversation_id.clone();
    let messages = blocking(move || conversations.list(&id)).await?;
    let Some(last) = messages.last() else {
        return Err(Error::NotFound(format!(
            "Conversation {} has no messages",
            conversation_id
        )));
    };
    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let tracer = state.extractor.tracer();
    let run = tracer.start_run(&last.id, PipelineType::MemoryExtraction)?;
    let job = ExtractionJob {
        run_id: run.id.clone(),
        text: transcript,
        message_id: last.id.clone(),
        conversation_id: Some(conversation_id),
        namespace: params.namespace.filter(|n| !n.is_empty()).map(NamespaceId),
    };
    let result = state.extractor.extract(&job).await;
    finish_run(tracer, &run.id, &result);
    let summary = result?;

    Ok(Json(serde_json::json!({
        "runId": run.id,
        "messageId": job.message_id,
        "summary": summary,
    })))
}

// =============================================================================
// Link prediction
// =============================================================================

/// GET /memory/link-prediction/:conversationId
async fn predict_link(
    State(state): State<PipelineState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.predictor.predict(&conversation_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, ExtractionConfig, LinkPredictionConfig};
    use crate::conversation::{NewMessage, Role};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::GenerativeModel;
    use crate::pipeline::extraction::tests::{acme_output, fixture, Fixture};
    use crate::tiers::{EpisodicTier, GraphTier, MemoryTier, StructuredTier};
    use crate::tracer::RunStatus;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_app(fx: &Fixture, model: Arc<dyn GenerativeModel>) -> Router {
        let extractor = Arc::new(fx.extractor(model.clone()));
        let (queue, _workers) = ExtractionQueue::start(
            extractor.clone(),
            &ExtractionConfig {
                retry_backoff_ms: 1,
                ..Default::default()
            },
        );
        let tiers: Vec<Arc<dyn MemoryTier>> = vec![
            Arc::new(EpisodicTier::new(fx.conversations.clone(), 10)),
            fx.semantic.clone(),
            Arc::new(StructuredTier::new(fx.graph.clone())),
            Arc::new(GraphTier::new(fx.graph.clone())),
        ];
        pipeline_router(PipelineState {
            assembler: Arc::new(ContextAssembler::new(
                tiers,
                fx.tracer.clone(),
                ContextConfig::default(),
            )),
            extractor,
            queue,
            predictor: Arc::new(LinkPredictor::new(
                model,
                fx.graph.clone(),
                fx.conversations.clone(),
                LinkPredictionConfig::default(),
            )),
            conversations: fx.conversations.clone(),
        })
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 256)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_submit_returns_202_and_completes() {
        let fx = fixture();
        let app = make_app(&fx, Arc::new(ScriptedModel::always(acme_output())));
        let (status, json) = send(
            app,
            "POST",
            "/memory/pipeline",
            Some(serde_json::json!({
                "textToAnalyze": "Alice works at Acme. Bob works at Acme.",
                "aiMessageId": "ai-1",
                "conversationId": "c1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = json["runId"].as_str().unwrap().to_string();

        let mut status = RunStatus::Running;
        for _ in 0..200 {
            status = fx.tracer.get_run(&run_id).unwrap().run.status;
            if status != RunStatus::Running {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_context_endpoint() {
        let fx = fixture();
        fx.conversations
            .append("c1", NewMessage::new(Role::User, "Where does Alice work?"))
            .unwrap();
        let app = make_app(&fx, Arc::new(ScriptedModel::always(acme_output())));
        let (status, json) = send(
            app,
            "POST",
            "/memory/context",
            Some(serde_json::json!({
                "conversationId": "c1",
                "userQuery": "Where does Alice work?",
                "messageId": "m-ctx"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["context"]
            .as_str()
            .unwrap()
            .contains("user: Where does Alice work?"));
        assert_eq!(json["tiers"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_extract_from_conversation() {
        let fx = fixture();
        fx.conversations
            .append("c1", NewMessage::new(Role::User, "Tell me about Acme"))
            .unwrap();
        let last = fx
            .conversations
            .append(
                "c1",
                NewMessage::new(Role::Assistant, "Alice works at Acme. Bob works at Acme."),
            )
            .unwrap();
        let app = make_app(&fx, Arc::new(ScriptedModel::always(acme_output())));

        let (status, json) = send(app, "GET", "/memory/extract-from-conversation/c1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["messageId"], last.id.as_str());
        assert_eq!(json["summary"]["edgesCreated"], 2);
        assert_eq!(fx.conversations.entities_for_message(&last.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_extract_from_empty_conversation() {
        let fx = fixture();
        let app = make_app(&fx, Arc::new(ScriptedModel::always(acme_output())));
        let (status, _) = send(app, "GET", "/memory/extract-from-conversation/none", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_link_prediction_null_without_candidates() {
        let fx = fixture();
        let app = make_app(&fx, Arc::new(ScriptedModel::always(acme_output())));
        let (status, json) = send(app, "GET", "/memory/link-prediction/c1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.is_null());
    }
}

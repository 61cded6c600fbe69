//! HTTP handlers for the knowledge graph
//!
//! Entities:
//! - GET    /entities                       list (type, namespace, q, limit)
//! - POST   /entities                       create (upsert)
//! - GET    /entities/:id                   entity detail
//! - PUT    /entities/:id                   partial update
//! - DELETE /entities/:id                   delete (cascades edges)
//! - POST   /entities/merge                 merge source into target
//! - POST   /entities/split                 split one entity into several
//! - GET    /entities/duplicates            duplicate candidates
//! - POST   /entities/bulk-actions          one action over many ids
//!
//! Relationships and vocabulary:
//! - GET/POST       /entities/relationships
//! - PUT/DELETE     /entities/relationships/:id
//! - GET/POST       /predicates
//! - PUT/DELETE     /predicates/:id
//! - GET            /validation-rules
//! - PUT/DELETE     /validation-rules/:entityType

use crate::config::GraphConfig;
use crate::error::Result;
use crate::graph::bulk::BulkActionRequest;
use crate::graph::consistency::{MergeRequest, SplitRequest};
use crate::graph::store::{EntityFilter, GraphStore};
use crate::graph::types::*;
use crate::graph::validation::{FieldRule, ValidationRule};
use crate::storage::blocking;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Shared state for graph handlers
#[derive(Clone)]
pub struct GraphState {
    pub store: Arc<GraphStore>,
    pub config: GraphConfig,
}

/// Create the graph router with all REST endpoints
pub fn graph_router(state: GraphState) -> Router {
    Router::new()
        .route("/entities", get(list_entities).post(create_entity))
        .route("/entities/merge", post(merge_entities))
        .route("/entities/split", post(split_entity))
        .route("/entities/duplicates", get(find_duplicates))
        .route("/entities/bulk-actions", post(bulk_action))
        .route(
            "/entities/relationships",
            get(list_relationships).post(create_relationship),
        )
        .route(
            "/entities/relationships/:id",
            put(update_relationship).delete(delete_relationship),
        )
        .route(
            "/entities/:id",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route("/predicates", get(list_predicates).post(create_predicate))
        .route(
            "/predicates/:id",
            put(update_predicate).delete(delete_predicate),
        )
        .route("/validation-rules", get(list_validation_rules))
        .route(
            "/validation-rules/:entity_type",
            put(set_validation_rules).delete(delete_validation_rules),
        )
        .with_state(state)
}

// =============================================================================
// Request types
// =============================================================================

fn namespace_param(value: Option<String>) -> Option<NamespaceId> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(NamespaceId::new)
}

#[derive(Debug, Deserialize)]
struct ListEntitiesQuery {
    #[serde(rename = "type")]
    entity_type: Option<String>,
    namespace: Option<String>,
    q: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NamespaceQuery {
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntityRequest {
    #[serde(flatten)]
    entity: NewEntity,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRelationshipsQuery {
    entity_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetRulesRequest {
    rules: Vec<FieldRule>,
}

// =============================================================================
// Entity handlers
// =============================================================================

/// GET /entities
async fn list_entities(
    State(state): State<GraphState>,
    Query(params): Query<ListEntitiesQuery>,
) -> Result<impl IntoResponse> {
    let namespace = namespace_param(params.namespace);
    let filter = EntityFilter {
        entity_type: params.entity_type.filter(|t| !t.is_empty()),
        query: params.q.filter(|q| !q.is_empty()),
        limit: params.limit,
    };
    let store = state.store;
    let entities = blocking(move || store.list_entities(namespace.as_ref(), &filter)).await?;
    Ok(Json(entities))
}

/// POST /entities
async fn create_entity(
    State(state): State<GraphState>,
    Json(request): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse> {
    let namespace = namespace_param(request.namespace);
    let store = state.store;
    let entity =
        blocking(move || store.create_entity(request.entity, namespace.as_ref())).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

/// GET /entities/:id
async fn get_entity(
    State(state): State<GraphState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.get_entity(&id)).await?))
}

/// PUT /entities/:id
async fn update_entity(
    State(state): State<GraphState>,
    Path(id): Path<String>,
    Json(update): Json<EntityUpdate>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.update_entity(&id, update)).await?))
}

/// DELETE /entities/:id
async fn delete_entity(
    State(state): State<GraphState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    blocking(move || store.delete_entity(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /entities/merge
async fn merge_entities(
    State(state): State<GraphState>,
    Json(request): Json<MergeRequest>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.merge(&request)).await?))
}

/// POST /entities/split
async fn split_entity(
    State(state): State<GraphState>,
    Json(request): Json<SplitRequest>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.split(request)).await?))
}

/// GET /entities/duplicates
async fn find_duplicates(
    State(state): State<GraphState>,
    Query(params): Query<NamespaceQuery>,
) -> Result<impl IntoResponse> {
    let namespace = namespace_param(params.namespace);
    let GraphState { store, config } = state;
    let candidates = blocking(move || {
        store.find_duplicates(
            namespace.as_ref(),
            config.duplicate_threshold,
            config.duplicate_limit,
        )
    })
    .await?;
    Ok(Json(candidates))
}

/// POST /entities/bulk-actions
async fn bulk_action(
    State(state): State<GraphState>,
    Json(request): Json<BulkActionRequest>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.bulk_action(&request)).await?))
}

// =============================================================================
// Relationship handlers
// =============================================================================

/// GET /entities/relationships
async fn list_relationships(
    State(state): State<GraphState>,
    Query(params): Query<ListRelationshipsQuery>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(
        blocking(move || store.list_edges(params.entity_id.as_deref())).await?,
    ))
}

/// POST /entities/relationships
async fn create_relationship(
    State(state): State<GraphState>,
    Json(request): Json<NewRelationship>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    let outcome = blocking(move || {
        store.create_edge(
            &request.source_entity_id,
            &request.predicate,
            &request.target_entity_id,
            &request.context,
        )
    })
    .await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// PUT /entities/relationships/:id
async fn update_relationship(
    State(state): State<GraphState>,
    Path(id): Path<String>,
    Json(update): Json<RelationshipUpdate>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.update_edge(&id, update)).await?))
}

/// DELETE /entities/relationships/:id
async fn delete_relationship(
    State(state): State<GraphState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    blocking(move || store.delete_edge(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Predicate handlers
// =============================================================================

/// GET /predicates
async fn list_predicates(State(state): State<GraphState>) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.list_predicates()).await?))
}

/// POST /predicates
async fn create_predicate(
    State(state): State<GraphState>,
    Json(request): Json<NewPredicate>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    let predicate = blocking(move || store.create_predicate(request)).await?;
    Ok((StatusCode::CREATED, Json(predicate)))
}

/// PUT /predicates/:id
async fn update_predicate(
    State(state): State<GraphState>,
    Path(id): Path<String>,
    Json(update): Json<PredicateUpdate>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.update_predicate(&id, update)).await?))
}

/// DELETE /predicates/:id
async fn delete_predicate(
    State(state): State<GraphState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    blocking(move || store.delete_predicate(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Validation rule handlers
// =============================================================================

/// GET /validation-rules
async fn list_validation_rules(State(state): State<GraphState>) -> Result<impl IntoResponse> {
    let store = state.store;
    Ok(Json(blocking(move || store.list_validation_rules()).await?))
}

/// PUT /validation-rules/:entityType
async fn set_validation_rules(
    State(state): State<GraphState>,
    Path(entity_type): Path<String>,
    Json(request): Json<SetRulesRequest>,
) -> Result<impl IntoResponse> {
    let rule_set = ValidationRule {
        entity_type,
        rules: request.rules,
    };
    let store = state.store;
    blocking(move || store.set_validation_rules(&rule_set).map(|_| rule_set))
        .await
        .map(Json)
}

/// DELETE /validation-rules/:entityType
async fn delete_validation_rules(
    State(state): State<GraphState>,
    Path(entity_type): Path<String>,
) -> Result<impl IntoResponse> {
    let store = state.store;
    blocking(move || store.delete_validation_rules(&entity_type)).await?;
    Ok(StatusCode::NO_CONTENT)
}

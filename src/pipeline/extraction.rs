//! Memory extraction pipeline
//!
//! Turns a piece of assistant output into durable memory:
//!
//! 1. `model.extract`: one structured-output call with a fixed schema
//! 2. `graph.upsert_entities`: entities are upserted by (name, type, namespace)
//! 3. `semantic.store_knowledge`: each fact becomes a vector entry
//! 4. `graph.create_edges`: relationship names are resolved to ids and
//!    inserted idempotently; unresolvable ones are skipped
//! 5. `lineage.link_message`: every touched entity is linked to the message
//!
//! Re-running the same input converges: entity upserts and edge inserts are
//! idempotent. Facts are not deduplicated.

use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::graph::{Entity, GraphStore, NamespaceId, NewEntity};
use crate::llm::{GenerativeModel, JsonRequest};
use crate::tiers::SemanticTier;
use crate::tracer::{StepRecord, TraceStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You extract long-term memory from assistant messages. \
Return the people, organizations, places, projects and other named things the text \
talks about, standalone facts worth remembering, and relationships between the \
extracted entities. Use snake_case predicates such as works_at or part_of. \
Only use entity names that appear in the entities list as relationship endpoints.";

/// One unit of extraction work
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub run_id: String,
    pub text: String,
    pub message_id: String,
    pub conversation_id: Option<String>,
    pub namespace: Option<NamespaceId>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExtractedRelationship {
    pub source: String,
    pub predicate: String,
    pub target: String,
}

/// Model output for the `memory_extraction` schema
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Extraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// What an extraction changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub entity_ids: Vec<String>,
    pub entities_rejected: usize,
    pub facts_stored: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    pub relationships_skipped: usize,
}

/// The fixed output schema sent with every extraction call.
pub fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["entities", "knowledge", "relationships"],
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "type", "description"],
                    "properties": {
                        "name": { "type": "string" },
                        "type": { "type": "string" },
                        "description": { "type": "string" }
                    }
                }
            },
            "knowledge": {
                "type": "array",
                "items": { "type": "string" }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["source", "predicate", "target"],
                    "properties": {
                        "source": { "type": "string" },
                        "predicate": { "type": "string" },
                        "target": { "type": "string" }
                    }
                }
            }
        }
    })
}

pub struct MemoryExtractor {
    model: Arc<dyn GenerativeModel>,
    graph: Arc<GraphStore>,
    conversations: Arc<ConversationStore>,
    semantic: Arc<SemanticTier>,
    tracer: Arc<TraceStore>,
}

impl MemoryExtractor {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        graph: Arc<GraphStore>,
        conversations: Arc<ConversationStore>,
        semantic: Arc<SemanticTier>,
        tracer: Arc<TraceStore>,
    ) -> Self {
        Self {
            model,
            graph,
            conversations,
            semantic,
            tracer,
        }
    }

    pub fn tracer(&self) -> &Arc<TraceStore> {
        &self.tracer
    }

    /// Run one attempt of the pipeline, recording steps under `job.run_id`.
    /// The run itself is left open for the caller to complete or fail.
    pub async fn extract(&self, job: &ExtractionJob) -> Result<ExtractionSummary> {
        let extraction = self.call_model(job).await?;
        let mut summary = ExtractionSummary::default();

        let resolved = self.upsert_entities(job, &extraction.entities, &mut summary)?;
        self.store_knowledge(job, &extraction.knowledge, &mut summary)
            .await?;
        self.create_edges(job, &extraction.relationships, &resolved, &mut summary)?;
        self.link_lineage(job, &summary)?;

        tracing::info!(
            run_id = %job.run_id,
            entities = summary.entity_ids.len(),
            facts = summary.facts_stored,
            edges = summary.edges_created,
            "Extraction finished"
        );
        Ok(summary)
    }

    async fn call_model(&self, job: &ExtractionJob) -> Result<Extraction> {
        let started = Utc::now();
        let request = JsonRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: job.text.clone(),
            schema_name: "memory_extraction".to_string(),
            schema: extraction_schema(),
        };
        let step = StepRecord::new("model.extract", started)
            .input(json!({ "textToAnalyze": job.text, "aiMessageId": job.message_id }))
            .model(self.model.name())
            .prompt(format!("{}\n\n{}", request.system, request.prompt))
            .config(json!({ "schemaName": request.schema_name }));

        let parsed = self.model.complete_json(&request).await.and_then(|value| {
            let extraction = serde_json::from_value::<Extraction>(value.clone()).map_err(|e| {
                Error::Upstream(format!("Model output did not match extraction schema: {}", e))
            })?;
            Ok((value, extraction))
        });

        match parsed {
            Ok((raw, extraction)) => {
                let step = if extraction.entities.is_empty()
                    && extraction.knowledge.is_empty()
                    && extraction.relationships.is_empty()
                {
                    step.output(raw).empty()
                } else {
                    step.output(raw)
                };
                self.tracer.record_step(&job.run_id, step)?;
                Ok(extraction)
            }
            Err(e) => {
                self.tracer
                    .record_step(&job.run_id, step.failed(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Upsert extracted entities. Returns the name → id map used to resolve
    /// relationship endpoints. Entities rejected by validation are skipped.
    fn upsert_entities(
        &self,
        job: &ExtractionJob,
        entities: &[ExtractedEntity],
        summary: &mut ExtractionSummary,
    ) -> Result<HashMap<String, String>> {
        let started = Utc::now();
        let mut resolved = HashMap::new();
        let mut rejected = Vec::new();

        for extracted in entities {
            let entity = NewEntity::new(extracted.name.clone(), extracted.entity_type.clone())
                .description(extracted.description.clone());
            match self.graph.create_entity(entity, job.namespace.as_ref()) {
                Ok(entity) => {
                    resolved.insert(entity.name.clone(), entity.id.clone());
                    if !summary.entity_ids.contains(&entity.id) {
                        summary.entity_ids.push(entity.id);
                    }
                }
                Err(Error::Validation(message)) => {
                    tracing::debug!(name = %extracted.name, error = %message, "Extracted entity rejected");
                    rejected.push(json!({ "name": extracted.name, "error": message }));
                }
                Err(e) => return Err(e),
            }
        }
        summary.entities_rejected = rejected.len();

        let step = StepRecord::new("graph.upsert_entities", started)
            .input(json!({ "count": entities.len() }))
            .output(json!({ "entityIds": summary.entity_ids, "rejected": rejected }));
        let step = if entities.is_empty() { step.empty() } else { step };
        self.tracer.record_step(&job.run_id, step)?;
        Ok(resolved)
    }

    async fn store_knowledge(
        &self,
        job: &ExtractionJob,
        knowledge: &[String],
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        let started = Utc::now();
        let mut ids = Vec::new();
        for fact in knowledge.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            match self
                .semantic
                .remember(fact, job.namespace.as_ref(), Some(&job.message_id))
                .await
            {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.tracer.record_step(
                        &job.run_id,
                        StepRecord::new("semantic.store_knowledge", started)
                            .input(json!({ "knowledge": knowledge }))
                            .output(json!({ "stored": ids }))
                            .failed(e.to_string()),
                    )?;
                    return Err(e);
                }
            }
        }
        summary.facts_stored = ids.len();

        let step = StepRecord::new("semantic.store_knowledge", started)
            .input(json!({ "knowledge": knowledge }))
            .output(json!({ "stored": ids }));
        let step = if ids.is_empty() { step.empty() } else { step };
        self.tracer.record_step(&job.run_id, step)?;
        Ok(())
    }

    /// Resolve an endpoint name: batch first, then an exact-name lookup in
    /// the job's namespace.
    fn resolve(
        &self,
        name: &str,
        batch: &HashMap<String, String>,
        namespace: Option<&NamespaceId>,
    ) -> Result<Option<String>> {
        let name = name.trim();
        if let Some(id) = batch.get(name) {
            return Ok(Some(id.clone()));
        }
        let found: Vec<Entity> = self.graph.find_entities_by_name(name, namespace)?;
        Ok(found.into_iter().next().map(|e| e.id))
    }

    fn create_edges(
        &self,
        job: &ExtractionJob,
        relationships: &[ExtractedRelationship],
        batch: &HashMap<String, String>,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        let started = Utc::now();
        let mut skipped = Vec::new();
        let mut edge_ids = Vec::new();

        for rel in relationships {
            let source = self.resolve(&rel.source, batch, job.namespace.as_ref())?;
            let target = self.resolve(&rel.target, batch, job.namespace.as_ref())?;
            let (source, target) = match (source, target) {
                (Some(s), Some(t)) => (s, t),
                _ => {
                    skipped.push(json!({
                        "source": rel.source,
                        "predicate": rel.predicate,
                        "target": rel.target,
                        "reason": "unresolved endpoint",
                    }));
                    continue;
                }
            };
            match self.graph.create_edge(&source, &rel.predicate, &target, "") {
                Ok(outcome) => {
                    if outcome.created {
                        summary.edges_created += 1;
                    } else {
                        summary.edges_existing += 1;
                    }
                    edge_ids.push(outcome.relationship.id);
                }
                Err(Error::Validation(reason)) => {
                    skipped.push(json!({
                        "source": rel.source,
                        "predicate": rel.predicate,
                        "target": rel.target,
                        "reason": reason,
                    }));
                }
                Err(e) => return Err(e),
            }
        }
        summary.relationships_skipped = skipped.len();

        let step = StepRecord::new("graph.create_edges", started)
            .input(json!({ "count": relationships.len() }))
            .output(json!({ "edgeIds": edge_ids, "skipped": skipped }));
        let step = if relationships.is_empty() { step.empty() } else { step };
        self.tracer.record_step(&job.run_id, step)?;
        Ok(())
    }

    fn link_lineage(&self, job: &ExtractionJob, summary: &ExtractionSummary) -> Result<()> {
        let started = Utc::now();
        let linked = self
            .conversations
            .link_entities(&job.message_id, &summary.entity_ids)?;
        let step = StepRecord::new("lineage.link_message", started)
            .input(json!({ "messageId": job.message_id, "entityIds": summary.entity_ids }))
            .output(json!({ "linked": linked }));
        let step = if summary.entity_ids.is_empty() { step.empty() } else { step };
        self.tracer.record_step(&job.run_id, step)?;
        Ok(())
    }
}

/// Close a run according to the extraction result.
pub(crate) fn finish_run(tracer: &TraceStore, run_id: &str, result: &Result<ExtractionSummary>) {
    let written = match result {
        Ok(summary) => {
            let output = serde_json::to_string(summary).unwrap_or_default();
            tracer.complete_run(run_id, &output)
        }
        Err(e) => tracer.fail_run(run_id, &e.to_string()),
    };
    if let Err(e) = written {
        tracing::error!(run_id = %run_id, error = %e, "Failed to close extraction run");
    }
}

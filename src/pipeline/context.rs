//! Context assembly pipeline
//!
//! Fans a query out to every memory tier at once, waits for all of them,
//! and composes the successful answers into one bounded context string.
//!
//! ```text
//!                 ┌─► episodic ──┐
//!   request ──────┼─► semantic ──┼──► compose ──► context
//!     (run)       ├─► structured ┤      (step)
//!                 └─► graph ─────┘
//!                  one step each
//! ```
//!
//! A tier that errors, times out or finds nothing is reported in its own
//! step and the others carry on; the run only fails if the tracer or the
//! composition itself fails.

use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::graph::NamespaceId;
use crate::tiers::{MemoryTier, TierKind, TierOutcome, TierQuery};
use crate::tracer::{PipelineType, StepRecord, TraceStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request body for `POST /memory/context`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    pub conversation_id: String,
    pub user_query: String,
    #[serde(default)]
    pub mentioned_entities: Vec<String>,
    /// Message the run is traced under
    pub message_id: String,
    #[serde(default)]
    pub namespace: Option<NamespaceId>,
}

/// Per-tier result reported back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierReport {
    pub tier: TierKind,
    #[serde(flatten)]
    pub outcome: TierOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    pub run_id: String,
    pub context: String,
    pub tiers: Vec<TierReport>,
}

pub struct ContextAssembler {
    tiers: Vec<Arc<dyn MemoryTier>>,
    tracer: Arc<TraceStore>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(tiers: Vec<Arc<dyn MemoryTier>>, tracer: Arc<TraceStore>, config: ContextConfig) -> Self {
        Self {
            tiers,
            tracer,
            config,
        }
    }

    /// Run the pipeline under a new traced run.
    pub async fn assemble(&self, request: &ContextRequest) -> Result<AssembledContext> {
        if request.message_id.trim().is_empty() {
            return Err(Error::Validation("messageId is required".to_string()));
        }
        let run = self
            .tracer
            .start_run(&request.message_id, PipelineType::ContextAssembly)?;
        tracing::info!(run_id = %run.id, message_id = %request.message_id, "Context assembly started");

        match self.assemble_in_run(&run.id, request).await {
            Ok(assembled) => {
                self.tracer.complete_run(&run.id, &assembled.context)?;
                tracing::info!(
                    run_id = %run.id,
                    chars = assembled.context.chars().count(),
                    "Context assembly completed"
                );
                Ok(assembled)
            }
            Err(e) => {
                if let Err(trace_err) = self.tracer.fail_run(&run.id, &e.to_string()) {
                    tracing::error!(run_id = %run.id, error = %trace_err, "Failed to record run failure");
                }
                Err(e)
            }
        }
    }

    async fn assemble_in_run(&self, run_id: &str, request: &ContextRequest) -> Result<AssembledContext> {
        let query = TierQuery {
            conversation_id: request.conversation_id.clone(),
            user_query: request.user_query.clone(),
            mentioned_entities: request.mentioned_entities.clone(),
            namespace: request.namespace.clone(),
        };
        let timeout = Duration::from_millis(self.config.tier_timeout_ms);

        let reports = futures::future::join_all(
            self.tiers
                .iter()
                .map(|tier| self.query_tier(run_id, tier.as_ref(), &query, timeout)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<TierReport>>>()?;

        let started = Utc::now();
        let outcomes: Vec<(TierKind, TierOutcome)> = reports
            .iter()
            .map(|r| (r.tier, r.outcome.clone()))
            .collect();
        let context = compose(&outcomes, self.config.max_chars);
        let statuses: serde_json::Map<String, serde_json::Value> = reports
            .iter()
            .map(|r| -> Result<(String, serde_json::Value)> {
                Ok((r.tier.to_string(), serde_json::to_value(&r.outcome)?))
            })
            .collect::<Result<_>>()?;
        self.tracer.record_step(
            run_id,
            StepRecord::new("compose", started)
                .input(json!({ "tiers": statuses }))
                .output(json!({ "context": context }))
                .config(json!({ "maxChars": self.config.max_chars })),
        )?;

        Ok(AssembledContext {
            run_id: run_id.to_string(),
            context,
            tiers: reports,
        })
    }

    /// Query one tier and record it as a step. Only a tracer failure is an error.
    async fn query_tier(
        &self,
        run_id: &str,
        tier: &dyn MemoryTier,
        query: &TierQuery,
        timeout: Duration,
    ) -> Result<TierReport> {
        let kind = tier.kind();
        let started = Utc::now();
        let clock = Instant::now();

        let result = match tokio::time::timeout(timeout, tier.query(query)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Upstream(format!(
                "{} tier timed out after {}ms",
                kind,
                timeout.as_millis()
            ))),
        };
        let outcome = TierOutcome::from_result(result);
        let duration_ms = clock.elapsed().as_millis() as u64;

        let mut step = StepRecord::new(format!("tier.{}", kind), started)
            .input(json!({
                "conversationId": query.conversation_id,
                "userQuery": query.user_query,
                "mentionedEntities": query.mentioned_entities,
            }))
            .config(json!({ "timeoutMs": timeout.as_millis() as u64 }));
        match &outcome {
            TierOutcome::Success(lines) => step = step.output(json!(lines)),
            TierOutcome::Empty => step = step.empty(),
            TierOutcome::Error(message) => {
                tracing::warn!(run_id = %run_id, tier = %kind, error = %message, "Memory tier failed");
                step = step.failed(message.clone());
            }
        }
        self.tracer.record_step(run_id, step)?;

        Ok(TierReport {
            tier: kind,
            outcome,
            duration_ms,
        })
    }
}

// =============================================================================
// Composition
// =============================================================================

const TIER_ORDER: [TierKind; 4] = [
    TierKind::Episodic,
    TierKind::Semantic,
    TierKind::Structured,
    TierKind::Graph,
];

fn render(sections: &[(TierKind, Vec<String>)]) -> String {
    sections
        .iter()
        .filter(|(_, lines)| !lines.is_empty())
        .map(|(kind, lines)| format!("{}\n{}", kind.header(), lines.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Concatenate successful tier answers under per-tier headers, keeping the
/// result within `max_chars`.
///
/// Over budget, the oldest episodic turns go first, then the weakest
/// semantic matches, down to one line each. That line is then cut to the
/// remaining room (episodic keeps its end, semantic its start). A tier is
/// left out only when even its header no longer fits. Structured and graph
/// lines are always kept.
pub fn compose(outcomes: &[(TierKind, TierOutcome)], max_chars: usize) -> String {
    let mut sections: Vec<(TierKind, Vec<String>)> = TIER_ORDER
        .iter()
        .map(|kind| {
            let lines = outcomes
                .iter()
                .find(|(k, _)| k == kind)
                .and_then(|(_, outcome)| match outcome {
                    TierOutcome::Success(lines) => Some(lines.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            (*kind, lines)
        })
        .collect();

    let over = |sections: &[(TierKind, Vec<String>)]| render(sections).chars().count() > max_chars;

    while over(&sections) && sections[0].1.len() > 1 {
        sections[0].1.remove(0);
    }
    while over(&sections) && sections[1].1.len() > 1 {
        sections[1].1.pop();
    }
    if over(&sections) {
        for dropped in 0..=2 {
            let mut trial = sections.clone();
            for (_, lines) in trial.iter_mut().take(dropped) {
                lines.clear();
            }
            cut_to_fit(&mut trial, max_chars);
            if dropped == 2 || !over(&trial) {
                sections = trial;
                break;
            }
        }
    }
    render(&sections)
}

/// Shorten the single remaining episodic and semantic lines, in that order,
/// leaving at least one character in each.
fn cut_to_fit(sections: &mut [(TierKind, Vec<String>)], max_chars: usize) {
    let mut excess = render(sections).chars().count().saturating_sub(max_chars);
    for (idx, keep_end) in [(0, true), (1, false)] {
        let Some(line) = sections[idx].1.first_mut() else {
            continue;
        };
        let len = line.chars().count();
        let cut = excess.min(len.saturating_sub(1));
        *line = if keep_end {
            line.chars().skip(cut).collect()
        } else {
            line.chars().take(len - cut).collect()
        };
        excess -= cut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationStore;
    use crate::graph::GraphStore;
    use crate::storage::Database;
    use crate::tiers::{EpisodicTier, GraphTier, StructuredTier};
    use crate::tracer::{RunStatus, StepStatus};
    use async_trait::async_trait;

    struct FixedTier {
        kind: TierKind,
        lines: Vec<String>,
    }

    #[async_trait]
    impl MemoryTier for FixedTier {
        fn kind(&self) -> TierKind {
            self.kind
        }

        async fn query(&self, _query: &TierQuery) -> Result<Vec<String>> {
            Ok(self.lines.clone())
        }
    }

    struct FailingTier;

    #[async_trait]
    impl MemoryTier for FailingTier {
        fn kind(&self) -> TierKind {
            TierKind::Semantic
        }

        async fn query(&self, _query: &TierQuery) -> Result<Vec<String>> {
            Err(Error::Upstream("vector tier not configured".into()))
        }
    }

    struct SlowTier;

    #[async_trait]
    impl MemoryTier for SlowTier {
        fn kind(&self) -> TierKind {
            TierKind::Graph
        }

        async fn query(&self, _query: &TierQuery) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["too late".into()])
        }
    }

    fn fixed(kind: TierKind, lines: &[&str]) -> Arc<dyn MemoryTier> {
        Arc::new(FixedTier {
            kind,
            lines: lines.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn request() -> ContextRequest {
        ContextRequest {
            conversation_id: "c1".into(),
            user_query: "where does Alice work?".into(),
            mentioned_entities: vec![],
            message_id: "msg-1".into(),
            namespace: None,
        }
    }

    fn make_tracer() -> Arc<TraceStore> {
        Arc::new(TraceStore::new(Arc::new(Database::in_memory().unwrap())))
    }

    #[tokio::test]
    async fn test_failing_tier_does_not_abort_assembly() {
        let tracer = make_tracer();
        let assembler = ContextAssembler::new(
            vec![
                fixed(TierKind::Episodic, &["user: hi"]),
                Arc::new(FailingTier),
                fixed(TierKind::Structured, &["Alice (person)"]),
                fixed(TierKind::Graph, &["Alice works_at Acme"]),
            ],
            tracer.clone(),
            ContextConfig::default(),
        );

        let assembled = assembler.assemble(&request()).await.unwrap();
        assert!(!assembled.context.is_empty());
        assert!(assembled.context.contains("Alice works_at Acme"));
        assert!(!assembled.context.contains(TierKind::Semantic.header()));

        let trace = tracer.get_run(&assembled.run_id).unwrap();
        assert_eq!(trace.run.status, RunStatus::Completed);
        assert_eq!(trace.run.final_output.as_deref(), Some(assembled.context.as_str()));
        assert_eq!(trace.steps.len(), 5);
        let semantic = trace
            .steps
            .iter()
            .find(|s| s.step_name == "tier.semantic")
            .unwrap();
        assert_eq!(semantic.status, StepStatus::Error);
        assert_eq!(trace.steps.last().unwrap().step_name, "compose");
    }

    #[tokio::test]
    async fn test_empty_tier_is_recorded_as_empty() {
        let tracer = make_tracer();
        let assembler = ContextAssembler::new(
            vec![fixed(TierKind::Episodic, &[]), fixed(TierKind::Graph, &["A knows B"])],
            tracer.clone(),
            ContextConfig::default(),
        );
        let assembled = assembler.assemble(&request()).await.unwrap();
        assert_eq!(assembled.tiers[0].outcome, TierOutcome::Empty);
        let trace = tracer.get_run(&assembled.run_id).unwrap();
        assert_eq!(trace.steps[0].status, StepStatus::Empty);
    }

    #[tokio::test]
    async fn test_slow_tier_times_out() {
        let tracer = make_tracer();
        let assembler = ContextAssembler::new(
            vec![fixed(TierKind::Episodic, &["user: hi"]), Arc::new(SlowTier)],
            tracer,
            ContextConfig {
                tier_timeout_ms: 50,
                ..Default::default()
            },
        );
        let assembled = assembler.assemble(&request()).await.unwrap();
        assert!(matches!(assembled.tiers[1].outcome, TierOutcome::Error(_)));
        assert!(assembled.context.contains("user: hi"));
    }

    #[tokio::test]
    async fn test_store_tiers_time_out_while_database_is_busy() {
        let db = Arc::new(Database::in_memory().unwrap());
        let graph = Arc::new(GraphStore::new(db.clone()));
        let conversations = Arc::new(ConversationStore::new(db.clone()));
        let assembler = ContextAssembler::new(
            vec![
                Arc::new(EpisodicTier::new(conversations, 5)),
                Arc::new(StructuredTier::new(graph.clone())),
                Arc::new(GraphTier::new(graph)),
            ],
            make_tracer(),
            ContextConfig {
                tier_timeout_ms: 50,
                ..Default::default()
            },
        );

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            db.with_conn(|_| {
                locked_tx.send(()).ok();
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let assembled = assembler.assemble(&request()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(assembled.tiers.len(), 3);
        for report in &assembled.tiers {
            assert!(matches!(report.outcome, TierOutcome::Error(_)));
        }
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_missing_message_id_rejected() {
        let assembler = ContextAssembler::new(vec![], make_tracer(), ContextConfig::default());
        let mut req = request();
        req.message_id = " ".into();
        assert!(matches!(assembler.assemble(&req).await, Err(Error::Validation(_))));
    }

    #[test]
    fn test_compose_order_and_headers() {
        let context = compose(
            &[
                (TierKind::Graph, TierOutcome::Success(vec!["A knows B".into()])),
                (TierKind::Episodic, TierOutcome::Success(vec!["user: hi".into()])),
                (TierKind::Semantic, TierOutcome::Empty),
            ],
            1000,
        );
        assert_eq!(
            context,
            "## Recent conversation\nuser: hi\n\n## Relationships\nA knows B"
        );
    }

    #[test]
    fn test_compose_truncates_episodic_first() {
        let episodic: Vec<String> = (0..20).map(|i| format!("user: message number {}", i)).collect();
        let outcomes = vec![
            (TierKind::Episodic, TierOutcome::Success(episodic)),
            (TierKind::Semantic, TierOutcome::Success(vec!["fact one".into(), "fact two".into()])),
            (TierKind::Structured, TierOutcome::Success(vec!["Alice (person)".into()])),
            (TierKind::Graph, TierOutcome::Success(vec!["Alice works_at Acme".into()])),
        ];
        let context = compose(&outcomes, 200);
        assert!(context.chars().count() <= 200);
        assert!(context.contains("fact one"));
        assert!(context.contains("fact two"));
        assert!(context.contains("Alice (person)"));
        assert!(context.contains("Alice works_at Acme"));
        // newest turn kept, oldest dropped
        assert!(context.contains("message number 19"));
        assert!(!context.contains("message number 0\n"));
    }

    #[test]
    fn test_compose_trims_semantic_then_cuts_episodic_line() {
        let outcomes = vec![
            (TierKind::Episodic, TierOutcome::Success(vec!["user: a long turn".into()])),
            (
                TierKind::Semantic,
                TierOutcome::Success(vec!["best fact".into(), "weaker fact".into()]),
            ),
            (TierKind::Graph, TierOutcome::Success(vec!["A knows B".into()])),
        ];
        let context = compose(&outcomes, 87);
        assert_eq!(context.chars().count(), 87);
        assert!(context.contains("## Recent conversation\nng turn"));
        assert!(context.contains("best fact"));
        assert!(!context.contains("weaker fact"));
        assert!(context.contains("A knows B"));
    }

    #[test]
    fn test_compose_cuts_long_turn_instead_of_dropping_it() {
        let turn = format!("user: {}end", "x".repeat(297));
        assert_eq!(turn.chars().count(), 306);
        let outcomes = vec![
            (TierKind::Episodic, TierOutcome::Success(vec![turn])),
            (TierKind::Structured, TierOutcome::Success(vec!["Alice (person)".into()])),
        ];
        let context = compose(&outcomes, 200);
        assert_eq!(context.chars().count(), 200);
        assert!(context.starts_with("## Recent conversation\nxxx"));
        assert!(context.contains("end\n\n## Known entities\nAlice (person)"));
    }

    #[test]
    fn test_compose_cuts_semantic_line_from_the_end() {
        let outcomes = vec![
            (
                TierKind::Semantic,
                TierOutcome::Success(vec!["Alice moved to Berlin in 2019 and works at Acme".into()]),
            ),
            (TierKind::Graph, TierOutcome::Success(vec!["A knows B".into()])),
        ];
        let context = compose(&outcomes, 60);
        assert_eq!(
            context,
            "## Relevant facts\nAlice moved to\n\n## Relationships\nA knows B"
        );
    }

    #[test]
    fn test_compose_drops_episodic_when_header_cannot_fit() {
        let outcomes = vec![
            (TierKind::Episodic, TierOutcome::Success(vec!["user: hello".into()])),
            (TierKind::Graph, TierOutcome::Success(vec!["A knows B".into()])),
        ];
        let context = compose(&outcomes, 40);
        assert_eq!(context, "## Relationships\nA knows B");
    }

    #[test]
    fn test_compose_keeps_structured_over_budget() {
        let outcomes = vec![(
            TierKind::Structured,
            TierOutcome::Success(vec!["x".repeat(100)]),
        )];
        let context = compose(&outcomes, 10);
        assert!(context.contains(&"x".repeat(100)));
    }
}

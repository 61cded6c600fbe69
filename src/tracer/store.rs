//! Durable pipeline trace
//!
//! Runs and steps live in `pipeline_runs` / `pipeline_run_steps`. Step order
//! is allocated inside the insert transaction, so concurrent writers to the
//! same run (the four context tiers) still get a gap-free, strictly
//! increasing sequence.

use super::types::*;
use crate::error::{Error, Result};
use crate::storage::{parse_ts, ts, Database};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, message_id, pipeline_type, status, final_output, error_message, \
     start_time, end_time, duration_ms";

const STEP_COLUMNS: &str = "id, run_id, step_order, step_name, status, input_payload, \
     output_payload, model_used, prompt_used, config_used, error_message, start_time, end_time, \
     duration_ms";

/// Pipeline run/step store
pub struct TraceStore {
    db: Arc<Database>,
}

/// Truncate to the millisecond precision timestamps are stored with, so a
/// duration computed here matches one recomputed from the stored columns.
fn stored_precision(dt: DateTime<Utc>) -> DateTime<Utc> {
    parse_ts(&ts(&dt))
}

fn decode_json(value: Option<String>) -> Option<serde_json::Value> {
    value.and_then(|v| serde_json::from_str(&v).ok())
}

fn encode_json(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    let pipeline_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let end_time: Option<String> = row.get(7)?;
    Ok(PipelineRun {
        id: row.get(0)?,
        message_id: row.get(1)?,
        pipeline_type: pipeline_type
            .parse()
            .unwrap_or(PipelineType::MemoryExtraction),
        status: status.parse().unwrap_or(RunStatus::Failed),
        final_output: row.get(4)?,
        error_message: row.get(5)?,
        start_time: parse_ts(&row.get::<_, String>(6)?),
        end_time: end_time.as_deref().map(parse_ts),
        duration_ms: row.get(8)?,
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<PipelineStep> {
    let status: String = row.get(4)?;
    Ok(PipelineStep {
        id: row.get(0)?,
        run_id: row.get(1)?,
        step_order: row.get(2)?,
        step_name: row.get(3)?,
        status: status.parse().unwrap_or(StepStatus::Error),
        input_payload: decode_json(row.get(5)?),
        output_payload: decode_json(row.get(6)?),
        model_used: row.get(7)?,
        prompt_used: row.get(8)?,
        config_used: decode_json(row.get(9)?),
        error_message: row.get(10)?,
        start_time: parse_ts(&row.get::<_, String>(11)?),
        end_time: parse_ts(&row.get::<_, String>(12)?),
        duration_ms: row.get(13)?,
    })
}

fn get_run_in(conn: &Connection, id: &str) -> Result<PipelineRun> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = ?1"),
        params![id],
        row_to_run,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Pipeline run {} not found", id)))
}

fn steps_in(conn: &Connection, run_id: &str) -> Result<Vec<PipelineStep>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM pipeline_run_steps WHERE run_id = ?1 ORDER BY step_order"
    ))?;
    let rows = stmt.query_map(params![run_id], row_to_step)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl TraceStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a run in the `running` state.
    pub fn start_run(&self, message_id: &str, pipeline_type: PipelineType) -> Result<PipelineRun> {
        let run = PipelineRun {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            pipeline_type,
            status: RunStatus::Running,
            final_output: None,
            error_message: None,
            start_time: stored_precision(Utc::now()),
            end_time: None,
            duration_ms: None,
        };
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO pipeline_runs (id, message_id, pipeline_type, status, start_time)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                params![
                    run.id,
                    run.message_id,
                    run.pipeline_type.to_string(),
                    ts(&run.start_time)
                ],
            )?;
            Ok(())
        })?;
        tracing::debug!(run_id = %run.id, pipeline = %pipeline_type, "Started pipeline run");
        Ok(run)
    }

    /// Append a step to a running run.
    pub fn record_step(&self, run_id: &str, step: StepRecord) -> Result<PipelineStep> {
        self.db.transaction(|tx| {
            let run = get_run_in(tx, run_id)?;
            if run.status != RunStatus::Running {
                return Err(Error::Conflict(format!(
                    "Pipeline run {} is already {}",
                    run_id, run.status
                )));
            }
            let step_order: i64 = tx.query_row(
                "SELECT COALESCE(MAX(step_order), 0) + 1 FROM pipeline_run_steps WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )?;

            let start_time = stored_precision(step.start_time);
            let end_time = stored_precision(step.end_time.unwrap_or_else(Utc::now)).max(start_time);
            let recorded = PipelineStep {
                id: Uuid::new_v4().to_string(),
                run_id: run_id.to_string(),
                step_order,
                step_name: step.step_name,
                status: step.status,
                input_payload: step.input_payload,
                output_payload: step.output_payload,
                model_used: step.model_used,
                prompt_used: step.prompt_used,
                config_used: step.config_used,
                error_message: step.error_message,
                start_time,
                end_time,
                duration_ms: (end_time - start_time).num_milliseconds(),
            };
            tx.execute(
                &format!(
                    "INSERT INTO pipeline_run_steps ({STEP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    recorded.id,
                    recorded.run_id,
                    recorded.step_order,
                    recorded.step_name,
                    recorded.status.to_string(),
                    encode_json(&recorded.input_payload),
                    encode_json(&recorded.output_payload),
                    recorded.model_used,
                    recorded.prompt_used,
                    encode_json(&recorded.config_used),
                    recorded.error_message,
                    ts(&recorded.start_time),
                    ts(&recorded.end_time),
                    recorded.duration_ms,
                ],
            )?;
            Ok(recorded)
        })
    }

    /// Mark a run `completed`. Fails if it already reached a terminal state.
    pub fn complete_run(&self, run_id: &str, final_output: &str) -> Result<PipelineRun> {
        self.finish(run_id, RunStatus::Completed, Some(final_output), None)
    }

    /// Mark a run `failed`. Fails if it already reached a terminal state.
    pub fn fail_run(&self, run_id: &str, error_message: &str) -> Result<PipelineRun> {
        self.finish(run_id, RunStatus::Failed, None, Some(error_message))
    }

    fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        final_output: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<PipelineRun> {
        let run = self.db.transaction(|tx| {
            let run = get_run_in(tx, run_id)?;
            if run.status != RunStatus::Running {
                return Err(Error::Conflict(format!(
                    "Pipeline run {} is already {}",
                    run_id, run.status
                )));
            }
            let end_time = stored_precision(Utc::now()).max(run.start_time);
            let duration_ms = (end_time - run.start_time).num_milliseconds();
            tx.execute(
                "UPDATE pipeline_runs
                 SET status = ?1, final_output = ?2, error_message = ?3, end_time = ?4, duration_ms = ?5
                 WHERE id = ?6 AND status = 'running'",
                params![
                    status.to_string(),
                    final_output,
                    error_message,
                    ts(&end_time),
                    duration_ms,
                    run_id
                ],
            )?;
            get_run_in(tx, run_id)
        })?;
        match status {
            RunStatus::Failed => tracing::warn!(
                run_id = %run_id,
                error = error_message.unwrap_or_default(),
                "Pipeline run failed"
            ),
            _ => tracing::debug!(run_id = %run_id, duration_ms = ?run.duration_ms, "Pipeline run completed"),
        }
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunTrace> {
        self.db.with_conn(|c| {
            Ok(RunTrace {
                run: get_run_in(c, run_id)?,
                steps: steps_in(c, run_id)?,
            })
        })
    }

    /// Every run triggered by a message, oldest first, each with its steps.
    pub fn inspect(&self, message_id: &str) -> Result<Vec<RunTrace>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE message_id = ?1
                 ORDER BY start_time, id"
            ))?;
            let runs = stmt
                .query_map(params![message_id], row_to_run)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            runs.into_iter()
                .map(|run| {
                    let steps = steps_in(c, &run.id)?;
                    Ok(RunTrace { run, steps })
                })
                .collect()
        })
    }

    /// Most recent runs first, without steps.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM pipeline_runs ORDER BY start_time DESC, id LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_run)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

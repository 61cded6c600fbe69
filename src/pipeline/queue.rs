//! Background extraction queue
//!
//! `submit` opens the trace run, enqueues the job and returns the run id
//! straight away. A fixed pool of workers drains a bounded channel; retryable
//! failures are retried with linear backoff, and the last failure marks the
//! run failed. A full channel is reported to the caller instead of blocking.
//!
//! Workers stop once every `ExtractionQueue` handle has been dropped and the
//! channel is drained.

use super::extraction::{finish_run, ExtractionJob, MemoryExtractor};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::graph::NamespaceId;
use crate::tracer::PipelineType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Request body for `POST /memory/pipeline`
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub text_to_analyze: String,
    pub ai_message_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<NamespaceId>,
}

#[derive(Clone)]
pub struct ExtractionQueue {
    sender: mpsc::Sender<ExtractionJob>,
    extractor: Arc<MemoryExtractor>,
}

impl ExtractionQueue {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(extractor: Arc<MemoryExtractor>, config: &ExtractionConfig) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let extractor = extractor.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    worker_loop(worker, receiver, extractor, config).await;
                })
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            capacity = config.queue_capacity.max(1),
            "Extraction queue started"
        );
        (Self { sender, extractor }, workers)
    }

    /// Open a run and enqueue the job. Returns the run id.
    pub fn submit(&self, request: ExtractionRequest) -> Result<String> {
        if request.ai_message_id.trim().is_empty() {
            return Err(Error::Validation("aiMessageId is required".to_string()));
        }
        if request.text_to_analyze.trim().is_empty() {
            return Err(Error::Validation("textToAnalyze is required".to_string()));
        }

        let tracer = self.extractor.tracer();
        let run = tracer.start_run(&request.ai_message_id, PipelineType::MemoryExtraction)?;
        let job = ExtractionJob {
            run_id: run.id.clone(),
            text: request.text_to_analyze,
            message_id: request.ai_message_id,
            conversation_id: request.conversation_id,
            namespace: request.namespace,
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(run_id = %run.id, "Extraction job queued");
                Ok(run.id)
            }
            Err(e) => {
                let error = match e {
                    mpsc::error::TrySendError::Full(_) => {
                        Error::QueueFull("Extraction queue is full".to_string())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Error::QueueFull("Extraction queue is shut down".to_string())
                    }
                };
                if let Err(trace_err) = tracer.fail_run(&run.id, &error.to_string()) {
                    tracing::error!(run_id = %run.id, error = %trace_err, "Failed to record rejected job");
                }
                tracing::warn!(run_id = %run.id, "{}", error);
                Err(error)
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    extractor: Arc<MemoryExtractor>,
    config: ExtractionConfig,
) {
    loop {
        let job = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker, "Extraction worker stopping");
            break;
        };
        let result = run_with_retry(&extractor, &job, &config).await;
        finish_run(extractor.tracer(), &job.run_id, &result);
    }
}

async fn run_with_retry(
    extractor: &MemoryExtractor,
    job: &ExtractionJob,
    config: &ExtractionConfig,
) -> Result<super::extraction::ExtractionSummary> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match extractor.extract(job).await {
            Ok(summary) => return Ok(summary),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = Duration::from_millis(config.retry_backoff_ms * attempt as u64);
                tracing::warn!(
                    run_id = %job.run_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Extraction attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    run_id = %job.run_id,
                    attempt,
                    error = %e,
                    "Extraction failed"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::pipeline::extraction::tests::{acme_output, fixture};
    use crate::tracer::RunStatus;

    fn request(message_id: &str) -> ExtractionRequest {
        ExtractionRequest {
            text_to_analyze: "Alice works at Acme. Bob works at Acme.".into(),
            ai_message_id: message_id.into(),
            conversation_id: None,
            namespace: None,
        }
    }

    fn config(workers: usize, capacity: usize) -> ExtractionConfig {
        ExtractionConfig {
            workers,
            queue_capacity: capacity,
            max_attempts: 3,
            retry_backoff_ms: 1,
        }
    }

    async fn wait_for_terminal(tracer: &crate::tracer::TraceStore, run_id: &str) -> RunStatus {
        for _ in 0..200 {
            let status = tracer.get_run(run_id).unwrap().run.status;
            if status != RunStatus::Running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        RunStatus::Running
    }

    #[tokio::test]
    async fn test_job_completes_in_background() {
        let fx = fixture();
        let extractor = Arc::new(fx.extractor(Arc::new(ScriptedModel::always(acme_output()))));
        let (queue, _workers) = ExtractionQueue::start(extractor, &config(2, 8));

        let run_id = queue.submit(request("ai-1")).unwrap();
        assert_eq!(wait_for_terminal(&fx.tracer, &run_id).await, RunStatus::Completed);

        let trace = fx.tracer.get_run(&run_id).unwrap();
        let output: serde_json::Value =
            serde_json::from_str(trace.run.final_output.as_deref().unwrap()).unwrap();
        assert_eq!(output["edgesCreated"], 2);
        assert_eq!(fx.graph.list_edges(None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let fx = fixture();
        let model = Arc::new(ScriptedModel::sequence(vec![
            Err(Error::Upstream("timeout".into())),
            Ok(acme_output()),
        ]));
        let extractor = Arc::new(fx.extractor(model.clone()));
        let (queue, _workers) = ExtractionQueue::start(extractor, &config(1, 8));

        let run_id = queue.submit(request("ai-2")).unwrap();
        assert_eq!(wait_for_terminal(&fx.tracer, &run_id).await, RunStatus::Completed);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_run() {
        let fx = fixture();
        let model = Arc::new(ScriptedModel::sequence(vec![]));
        let extractor = Arc::new(fx.extractor(model.clone()));
        let (queue, _workers) = ExtractionQueue::start(extractor, &config(1, 8));

        let run_id = queue.submit(request("ai-3")).unwrap();
        assert_eq!(wait_for_terminal(&fx.tracer, &run_id).await, RunStatus::Failed);
        assert_eq!(model.call_count(), 3);
        let trace = fx.tracer.get_run(&run_id).unwrap();
        assert!(trace.run.error_message.unwrap().contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let fx = fixture();
        let extractor = Arc::new(fx.extractor(Arc::new(ScriptedModel::always(acme_output()))));
        // build the queue without workers so nothing drains it
        let (sender, _receiver) = mpsc::channel(1);
        let queue = ExtractionQueue { sender, extractor };

        queue.submit(request("ai-4")).unwrap();
        let err = queue.submit(request("ai-5")).unwrap_err();
        assert!(matches!(err, Error::QueueFull(_)));

        let rejected = fx.tracer.inspect("ai-5").unwrap();
        assert_eq!(rejected[0].run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_submit_validates() {
        let fx = fixture();
        let extractor = Arc::new(fx.extractor(Arc::new(ScriptedModel::always(acme_output()))));
        let (queue, _workers) = ExtractionQueue::start(extractor, &config(1, 8));
        let mut req = request("");
        assert!(matches!(queue.submit(req.clone()), Err(Error::Validation(_))));
        req.ai_message_id = "ai-6".into();
        req.text_to_analyze = "  ".into();
        assert!(matches!(queue.submit(req), Err(Error::Validation(_))));
    }
}

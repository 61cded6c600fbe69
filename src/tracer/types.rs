//! Pipeline trace types
//!
//! A `PipelineRun` is written once when a pipeline starts and updated exactly
//! once when it reaches a terminal state. `PipelineStep`s are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipeline produced a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    ContextAssembly,
    MemoryExtraction,
}

impl std::fmt::Display for PipelineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextAssembly => write!(f, "context_assembly"),
            Self::MemoryExtraction => write!(f, "memory_extraction"),
        }
    }
}

impl std::str::FromStr for PipelineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context_assembly" => Ok(Self::ContextAssembly),
            "memory_extraction" => Ok(Self::MemoryExtraction),
            other => Err(format!("unknown pipeline type: {}", other)),
        }
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Outcome of a single step. `Empty` means the step ran but found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Empty,
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Empty => write!(f, "empty"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "empty" => Ok(Self::Empty),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown step status: {}", other)),
        }
    }
}

/// One pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub message_id: String,
    pub pipeline_type: PipelineType,
    pub status: RunStatus,
    pub final_output: Option<String>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// One recorded sub-operation of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub id: String,
    pub run_id: String,
    /// 1-based, strictly increasing within a run
    pub step_order: i64,
    pub step_name: String,
    pub status: StepStatus,
    pub input_payload: Option<serde_json::Value>,
    pub output_payload: Option<serde_json::Value>,
    pub model_used: Option<String>,
    pub prompt_used: Option<String>,
    pub config_used: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

/// A step about to be appended to a run
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_name: String,
    pub status: StepStatus,
    pub input_payload: Option<serde_json::Value>,
    pub output_payload: Option<serde_json::Value>,
    pub model_used: Option<String>,
    pub prompt_used: Option<String>,
    pub config_used: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Defaults to the moment the step is recorded
    pub end_time: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// A successful step that started at `start_time`.
    pub fn new(step_name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Success,
            input_payload: None,
            output_payload: None,
            model_used: None,
            prompt_used: None,
            config_used: None,
            error_message: None,
            start_time,
            end_time: None,
        }
    }

    pub fn input(mut self, payload: serde_json::Value) -> Self {
        self.input_payload = Some(payload);
        self
    }

    pub fn output(mut self, payload: serde_json::Value) -> Self {
        self.output_payload = Some(payload);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_used = Some(prompt.into());
        self
    }

    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config_used = Some(config);
        self
    }

    pub fn empty(mut self) -> Self {
        self.status = StepStatus::Empty;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = StepStatus::Error;
        self.error_message = Some(message.into());
        self
    }
}

/// A run with its ordered steps, as returned by `/inspect`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    #[serde(flatten)]
    pub run: PipelineRun,
    pub steps: Vec<PipelineStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip() {
        for t in [PipelineType::ContextAssembly, PipelineType::MemoryExtraction] {
            assert_eq!(t.to_string().parse::<PipelineType>().unwrap(), t);
        }
        for s in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(s.to_string().parse::<RunStatus>().unwrap(), s);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_step_record_builder() {
        let step = StepRecord::new("tier.semantic", Utc::now())
            .input(serde_json::json!({"query": "acme"}))
            .failed("index offline");
        assert_eq!(step.status, StepStatus::Error);
        assert_eq!(step.error_message.as_deref(), Some("index offline"));
        assert!(step.end_time.is_none());
    }

    #[test]
    fn test_run_trace_serialization() {
        let trace = RunTrace {
            run: PipelineRun {
                id: "r1".into(),
                message_id: "m1".into(),
                pipeline_type: PipelineType::ContextAssembly,
                status: RunStatus::Completed,
                final_output: Some("ctx".into()),
                error_message: None,
                start_time: Utc::now(),
                end_time: Some(Utc::now()),
                duration_ms: Some(3),
            },
            steps: vec![],
        };
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["pipelineType"], "context_assembly");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["messageId"], "m1");
        assert!(json["steps"].as_array().unwrap().is_empty());
    }
}

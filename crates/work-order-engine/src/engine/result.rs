//! Step and run result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::Context;
use crate::error::{EngineError, ErrorCode};
use crate::sql::DmlSpec;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Ended successfully (RETURN_SUCCESS or a successful final step).
    Completed,
    /// Ended with a business failure (RETURN_ERROR, or a path whose last query failed).
    Failed,
    /// Aborted by a fatal error.
    Aborted,
    /// Cancelled by the caller.
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Operation-specific record of a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepDetail {
    Query {
        table: String,
        sql: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        row_count: usize,
    },
    /// Queued DML with the context as it was when the step ran.
    Dml { dml: DmlSpec, context: Context },
    Return {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Passthrough { next_step: Option<u32> },
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: u32,
    pub operation: String,
    pub success: bool,

    #[serde(flatten)]
    pub detail: StepDetail,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl StepResult {
    pub fn new(step: u32, operation: impl Into<String>, detail: StepDetail) -> Self {
        Self {
            step,
            operation: operation.into(),
            success: true,
            detail,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The queued DML and its context snapshot, for GENERATE_DML results.
    pub fn dml(&self) -> Option<(&DmlSpec, &Context)> {
        match &self.detail {
            StepDetail::Dml { dml, context } => Some((dml, context)),
            _ => None,
        }
    }
}

/// Terminal envelope of one interpreter run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub work_order_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    pub status: RunStatus,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    pub steps: Vec<StepResult>,
    pub context: Context,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunResult {
    /// GENERATE_DML results in execution order.
    pub fn dml_results(&self) -> impl Iterator<Item = (u32, &DmlSpec, &Context)> {
        self.steps
            .iter()
            .filter_map(|r| r.dml().map(|(spec, ctx)| (r.step, spec, ctx)))
    }

    /// Returns true if the run ended on a fatal error or cancellation.
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, RunStatus::Aborted | RunStatus::Cancelled)
    }
}

/// How a run ended, before the envelope is assembled.
#[derive(Debug)]
pub(crate) enum Termination {
    Success(Option<String>),
    Failure {
        code: ErrorCode,
        message: String,
    },
    Fatal(EngineError),
}

impl Termination {
    pub(crate) fn status(&self) -> RunStatus {
        match self {
            Termination::Success(_) => RunStatus::Completed,
            Termination::Failure { .. } => RunStatus::Failed,
            Termination::Fatal(EngineError::Cancelled(_)) => RunStatus::Cancelled,
            Termination::Fatal(_) => RunStatus::Aborted,
        }
    }
}

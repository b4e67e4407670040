//! Work Order Engine
//!
//! Configuration-driven multi-step execution for work orders.
//!
//! This crate provides:
//! - Step configuration model, parser and file-backed store
//! - Step interpreter with conditional branching and cross-step variables
//! - Variable substitution into SQL literals
//! - Safe condition evaluator over a fixed grammar
//! - DML builder with risk estimation
//! - Read-only query collaborator with a PostgreSQL implementation

pub mod condition;
pub mod config;
pub mod context;
pub mod dml;
pub mod engine;
pub mod error;
pub mod query;
pub mod sql;
pub mod steps;
pub mod store;
pub mod template;

pub use condition::{evaluate_condition, ConditionError, ConditionEvaluator};
pub use config::EngineConfig;
pub use context::Context;
pub use dml::{DmlPlan, DmlStatement};
pub use engine::{
    CancelSource, CancelToken, InterpreterOptions, RunRequest, RunResult, RunStatus, StepDetail,
    StepInterpreter, StepResult,
};
pub use error::{ConfigError, EngineError, EngineResult, ErrorCode};
pub use query::{
    ensure_read_only, format_query_output, PostgresQueryExecutor, PostgresSettings, QueryError,
    QueryExecutor, QueryOutput,
};
pub use sql::{estimate_risk, DmlSpec, DmlType, RiskLevel, SqlBuilder};
pub use steps::{parse_step_config, Branch, ParseOptions, Step, StepConfig, StepKind};
pub use store::StepConfigStore;

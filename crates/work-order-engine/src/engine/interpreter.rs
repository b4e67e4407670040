//! Step interpreter.
//!
//! Walks a [`StepConfig`] as a state machine:
//! - resolves the current step number against the step index
//! - dispatches on the operation (QUERY, GENERATE_DML, RETURN_*)
//! - picks the next step from the step's branches
//!
//! The loop is iterative with an iteration ceiling, so cyclic configurations
//! end with `LOOP_GUARD_EXCEEDED` instead of running forever. Every exit path
//! produces a [`RunResult`] carrying the step results accumulated so far.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::condition::ConditionEvaluator;
use crate::context::Context;
use crate::engine::cancel::CancelToken;
use crate::engine::result::{RunResult, StepDetail, StepResult, Termination};
use crate::error::{ConfigError, EngineError, ErrorCode};
use crate::query::{QueryError, QueryExecutor, QueryOutput};
use crate::sql::format_predicate;
use crate::steps::{Branch, QueryStep, Step, StepConfig, StepKind};
use crate::template;

/// Default iteration ceiling.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Interpreter settings.
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Steps executed before the run is aborted as runaway.
    pub max_iterations: usize,
    /// Start step when the request names none; lowest declared step otherwise.
    pub start_step: Option<u32>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            start_step: None,
        }
    }
}

/// Input of one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Extracted entities seeding the context.
    pub entities: Map<String, Value>,
    /// Overrides the configured start step.
    pub start_step: Option<u32>,
    /// Caller correlation id.
    pub task_id: Option<String>,
}

impl RunRequest {
    pub fn new(entities: Map<String, Value>) -> Self {
        Self {
            entities,
            ..Default::default()
        }
    }

    pub fn with_start_step(mut self, step: u32) -> Self {
        self.start_step = Some(step);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Which branch of a step to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// Result of a QUERY step.
enum QueryStepOutcome {
    Ok(StepResult, QueryOutput),
    Failed(StepResult, QueryError),
    Cancelled,
}

/// Mutable state of one run. Never shared between runs.
struct RunState {
    run_id: Uuid,
    context: Context,
    steps: Vec<StepResult>,
    /// Success implied by the last QUERY/GENERATE_DML step.
    last_success: bool,
    last_error: Option<String>,
}

/// Executes step configurations.
pub struct StepInterpreter {
    executor: Arc<dyn QueryExecutor>,
    evaluator: ConditionEvaluator,
    options: InterpreterOptions,
}

impl StepInterpreter {
    /// Create an interpreter with default options.
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            evaluator: ConditionEvaluator::new(),
            options: InterpreterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    /// Run a configuration to completion.
    pub async fn run(&self, config: &StepConfig, request: RunRequest) -> RunResult {
        self.run_with_cancel(config, request, CancelToken::never())
            .await
    }

    /// Run a configuration, stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        config: &StepConfig,
        request: RunRequest,
        mut cancel: CancelToken,
    ) -> RunResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut state = RunState {
            run_id: Uuid::new_v4(),
            context: Context::from_map(request.entities),
            steps: Vec::new(),
            last_success: true,
            last_error: None,
        };

        tracing::info!(
            run_id = %state.run_id,
            task_id = ?request.task_id,
            work_order_type = %config.work_order_type,
            steps = config.len(),
            "Starting work order run"
        );

        let termination = self
            .drive(config, request.start_step, &mut state, &mut cancel)
            .await;

        let status = termination.status();
        let (success, message, error, error_code) = match termination {
            Termination::Success(message) => (true, message, None, None),
            Termination::Failure { code, message } => (false, None, Some(message), Some(code)),
            Termination::Fatal(e) => (false, None, Some(e.to_string()), Some(e.code())),
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        if success {
            tracing::info!(
                run_id = %state.run_id,
                work_order_type = %config.work_order_type,
                status = %status,
                steps = state.steps.len(),
                duration_ms,
                "Work order run finished"
            );
        } else {
            tracing::error!(
                run_id = %state.run_id,
                work_order_type = %config.work_order_type,
                status = %status,
                error_code = ?error_code,
                error = ?error,
                steps = state.steps.len(),
                duration_ms,
                "Work order run failed"
            );
        }

        RunResult {
            run_id: state.run_id,
            work_order_type: config.work_order_type.clone(),
            task_id: request.task_id,
            status,
            success,
            message,
            error,
            error_code,
            steps: state.steps,
            context: state.context,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    /// The transition loop.
    async fn drive(
        &self,
        config: &StepConfig,
        requested_start: Option<u32>,
        state: &mut RunState,
        cancel: &mut CancelToken,
    ) -> Termination {
        let start_step = requested_start
            .or(self.options.start_step)
            .or_else(|| config.lowest_step());

        let mut current = start_step;
        let mut iterations = 0usize;

        while let Some(number) = current {
            if cancel.is_cancelled() {
                return Termination::Fatal(EngineError::Cancelled(state.steps.len()));
            }

            if iterations >= self.options.max_iterations {
                return Termination::Fatal(EngineError::LoopGuard(self.options.max_iterations));
            }
            iterations += 1;

            let Some(step) = config.get(number) else {
                return Termination::Fatal(EngineError::StepNotFound(number));
            };

            tracing::info!(
                run_id = %state.run_id,
                step = number,
                operation = %step.operation(),
                iteration = iterations,
                "Executing step"
            );

            current = match &step.kind {
                StepKind::Query(query) => {
                    match self.execute_query(step, query, state, cancel).await {
                        QueryStepOutcome::Ok(result, output) => {
                            apply_query_output(&mut state.context, query, &output, state.run_id);
                            state.steps.push(result);
                            state.last_success = true;
                            state.last_error = None;
                            self.next_step(config, step, Outcome::Success, &state.context)
                        }
                        QueryStepOutcome::Failed(result, err) => {
                            state.steps.push(result);
                            if step.on_failure.is_none() {
                                return Termination::Fatal(EngineError::QueryFailed {
                                    step: number,
                                    message: err.to_string(),
                                });
                            }
                            state.last_success = false;
                            state.last_error = Some(err.to_string());
                            self.next_step(config, step, Outcome::Failure, &state.context)
                        }
                        QueryStepOutcome::Cancelled => {
                            return Termination::Fatal(EngineError::Cancelled(state.steps.len()));
                        }
                    }
                }
                StepKind::GenerateDml(spec) => {
                    tracing::info!(
                        run_id = %state.run_id,
                        step = number,
                        dml_type = %spec.dml_type,
                        table = %spec.table,
                        "Queued DML generation"
                    );
                    state.steps.push(StepResult::new(
                        number,
                        step.operation(),
                        StepDetail::Dml {
                            dml: spec.clone(),
                            context: state.context.snapshot(),
                        },
                    ));
                    state.last_success = true;
                    state.last_error = None;
                    self.next_step(config, step, Outcome::Success, &state.context)
                }
                StepKind::ReturnError { message } => {
                    let message = message
                        .clone()
                        .unwrap_or_else(|| format!("Step {} returned an error", number));
                    state.steps.push(
                        StepResult::new(
                            number,
                            step.operation(),
                            StepDetail::Return {
                                message: Some(message.clone()),
                            },
                        )
                        .failed(message.clone()),
                    );
                    return Termination::Failure {
                        code: ErrorCode::ReturnError,
                        message,
                    };
                }
                StepKind::ReturnSuccess { message } => {
                    state.steps.push(StepResult::new(
                        number,
                        step.operation(),
                        StepDetail::Return {
                            message: message.clone(),
                        },
                    ));
                    return Termination::Success(message.clone());
                }
                StepKind::Unknown { operation } => match step.next_step {
                    Some(next) => {
                        tracing::warn!(
                            run_id = %state.run_id,
                            step = number,
                            operation = %operation,
                            next_step = ?next,
                            "Unknown operation, following next_step"
                        );
                        state.steps.push(StepResult::new(
                            number,
                            operation.clone(),
                            StepDetail::Passthrough { next_step: next },
                        ));
                        next
                    }
                    None => {
                        return Termination::Fatal(EngineError::Config(ConfigError::InvalidStep {
                            step: number.to_string(),
                            field: "operation".to_string(),
                            reason: format!("has unknown value '{}'", operation),
                        }));
                    }
                },
            };

            tracing::debug!(run_id = %state.run_id, step = number, next_step = ?current, "Resolved next step");
        }

        if state.last_success {
            Termination::Success(Some(format!(
                "Completed {} steps",
                state.steps.len()
            )))
        } else {
            Termination::Failure {
                code: ErrorCode::QueryFailed,
                message: state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "Last query failed".to_string()),
            }
        }
    }

    /// Render and run a QUERY step, racing the call against cancellation.
    async fn execute_query(
        &self,
        step: &Step,
        query: &QueryStep,
        state: &RunState,
        cancel: &mut CancelToken,
    ) -> QueryStepOutcome {
        let sql = build_select(query, &state.context);
        tracing::debug!(run_id = %state.run_id, step = step.number, sql = %sql, executor = self.executor.name(), "Rendered query");

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return QueryStepOutcome::Cancelled,
            r = self.executor.execute_query(&sql) => r,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::info!(
                    run_id = %state.run_id,
                    step = step.number,
                    rows = output.row_count,
                    "Query step returned rows"
                );
                let record = StepResult::new(
                    step.number,
                    step.operation(),
                    StepDetail::Query {
                        table: query.table.clone(),
                        sql,
                        columns: output.columns.clone(),
                        rows: output.rows.clone(),
                        row_count: output.row_count,
                    },
                )
                .with_duration(duration_ms);
                QueryStepOutcome::Ok(record, output)
            }
            Err(e) => {
                tracing::warn!(run_id = %state.run_id, step = step.number, error = %e, "Query step failed");
                let record = StepResult::new(
                    step.number,
                    step.operation(),
                    StepDetail::Query {
                        table: query.table.clone(),
                        sql,
                        columns: Vec::new(),
                        rows: Vec::new(),
                        row_count: 0,
                    },
                )
                .failed(e.to_string())
                .with_duration(duration_ms);
                QueryStepOutcome::Failed(record, e)
            }
        }
    }

    /// Pick the next step after `step` ended with `outcome`.
    fn next_step(
        &self,
        config: &StepConfig,
        step: &Step,
        outcome: Outcome,
        ctx: &Context,
    ) -> Option<u32> {
        let branch = match outcome {
            Outcome::Success => step.on_success.as_ref(),
            Outcome::Failure => step.on_failure.as_ref(),
        };

        match branch {
            Some(b) => self.follow_branch(step.number, b, ctx),
            None => match step.next_step {
                Some(explicit) => explicit,
                None => step.number.checked_add(1).filter(|n| config.contains(*n)),
            },
        }
    }

    fn follow_branch(&self, number: u32, branch: &Branch, ctx: &Context) -> Option<u32> {
        let Some(condition) = branch.condition.as_deref() else {
            return branch.next_step;
        };

        match self.evaluator.try_evaluate(condition, ctx) {
            Ok(true) => branch.next_step,
            Ok(false) => branch.else_step,
            Err(e) => {
                tracing::warn!(
                    step = number,
                    condition = %condition,
                    error = %e,
                    "Branch condition failed to evaluate, taking else_step"
                );
                branch.else_step
            }
        }
    }
}

/// `SELECT <fields> FROM <table> [WHERE <rendered>]`.
pub fn build_select(query: &QueryStep, ctx: &Context) -> String {
    let mut sql = format!("SELECT {} FROM {}", query.select_list(), query.table);
    if let Some(where_clause) = query.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(&format_predicate(&template::render_clause(where_clause, ctx)));
    }
    sql
}

/// Copy first-row values into the context. Requested fields missing from
/// the result are written as null.
fn apply_query_output(ctx: &mut Context, query: &QueryStep, output: &QueryOutput, run_id: Uuid) {
    if query.selects_all() {
        if output.is_empty() {
            tracing::warn!(run_id = %run_id, table = %query.table, "Query returned no rows, context unchanged");
            return;
        }
        for column in &output.columns {
            let value = output.first_row_value(column).cloned().unwrap_or(Value::Null);
            tracing::debug!(run_id = %run_id, variable = %column, value = %value, "Context updated");
            ctx.set(column.clone(), value);
        }
        return;
    }

    if output.is_empty() {
        tracing::warn!(run_id = %run_id, table = %query.table, "Query returned no rows, output fields set to null");
    }
    for field in &query.output_fields {
        let value = output.first_row_value(field).cloned().unwrap_or(Value::Null);
        tracing::debug!(run_id = %run_id, variable = %field, value = %value, "Context updated");
        ctx.set(field.clone(), value);
    }
}

//! DML materialization.
//!
//! After a run, every GENERATE_DML result is rendered into one statement
//! using the context snapshot taken when that step ran. Statements are
//! terminated with `;` and joined with newlines, and the plan carries the
//! highest risk among them.

use serde::Serialize;

use crate::engine::RunResult;
use crate::error::EngineResult;
use crate::sql::{DmlType, RiskLevel, SqlBuilder};

/// One rendered statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmlStatement {
    pub step: u32,
    pub operation: DmlType,
    pub table: String,
    pub sql: String,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

/// Rendered DML for one run, ready for review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmlPlan {
    /// All statements, `;`-terminated and newline-separated.
    pub sql: String,
    /// Distinct operation types in statement order.
    pub operation_types: Vec<DmlType>,
    /// Distinct tables in statement order.
    pub affected_tables: Vec<String>,
    /// Highest risk among the statements.
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub statements: Vec<DmlStatement>,
}

impl DmlPlan {
    /// Render the GENERATE_DML results of a run. Returns `None` when the run
    /// queued no DML.
    pub fn from_run(run: &RunResult, description: Option<&str>) -> EngineResult<Option<DmlPlan>> {
        let builder = SqlBuilder::new();
        let mut statements = Vec::new();

        for (step, spec, ctx) in run.dml_results() {
            let sql = builder.build(step, spec, ctx)?;
            tracing::debug!(run_id = %run.run_id, step, sql = %sql, "Materialized DML");
            statements.push(DmlStatement {
                step,
                operation: spec.dml_type,
                table: spec.table.clone(),
                sql,
                risk_level: spec.risk(),
                conditions: spec.where_clause.clone(),
            });
        }

        if statements.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self::from_statements(statements, description)))
    }

    /// Assemble a plan from already-rendered statements.
    pub fn from_statements(statements: Vec<DmlStatement>, description: Option<&str>) -> Self {
        let sql = statements
            .iter()
            .map(|s| format!("{};", s.sql.trim_end().trim_end_matches(';')))
            .collect::<Vec<_>>()
            .join("\n");

        let mut operation_types = Vec::new();
        let mut affected_tables: Vec<String> = Vec::new();
        for s in &statements {
            if !operation_types.contains(&s.operation) {
                operation_types.push(s.operation);
            }
            if !affected_tables.contains(&s.table) {
                affected_tables.push(s.table.clone());
            }
        }

        let risk_level = statements
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);

        Self {
            sql,
            operation_types,
            affected_tables,
            risk_level,
            description: description.map(str::to_string),
            statements,
        }
    }
}

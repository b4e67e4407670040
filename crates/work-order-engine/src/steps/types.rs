//! Step configuration types.
//!
//! A configuration is a keyed jump table of steps:
//! - each step has a unique number and one operation
//! - `on_success` / `on_failure` branches pick the next step, optionally guarded by a condition
//! - a flat `next_step` key applies when no branch is configured

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sql::DmlSpec;

/// Operation tags as written in configuration files.
pub const OP_QUERY: &str = "QUERY";
pub const OP_GENERATE_DML: &str = "GENERATE_DML";
pub const OP_RETURN_ERROR: &str = "RETURN_ERROR";
pub const OP_RETURN_SUCCESS: &str = "RETURN_SUCCESS";

/// Conditional routing rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Guard expression; absent means "always take `next_step`".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Target when the condition holds. Null ends the run.
    #[serde(default)]
    pub next_step: Option<u32>,

    /// Target when the condition is false or fails to evaluate.
    #[serde(default)]
    pub else_step: Option<u32>,
}

impl Branch {
    /// Unconditional branch to `target`.
    pub fn goto(target: u32) -> Self {
        Self {
            condition: None,
            next_step: Some(target),
            else_step: None,
        }
    }

    /// Declared targets.
    pub fn targets(&self) -> impl Iterator<Item = (&'static str, u32)> {
        self.next_step
            .map(|t| ("next_step", t))
            .into_iter()
            .chain(self.else_step.map(|t| ("else_step", t)))
    }
}

/// A read step: `SELECT <output_fields> FROM <table> [WHERE <where>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStep {
    pub table: String,

    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    /// Columns copied into the context. Empty or `*` selects every column.
    #[serde(default)]
    pub output_fields: Vec<String>,
}

impl QueryStep {
    /// Returns true when every returned column should be selected.
    pub fn selects_all(&self) -> bool {
        self.output_fields.is_empty() || self.output_fields.iter().any(|f| f.trim() == "*")
    }

    /// The SELECT list.
    pub fn select_list(&self) -> String {
        if self.selects_all() {
            "*".to_string()
        } else {
            self.output_fields.join(", ")
        }
    }
}

/// Operation-specific payload of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Query(QueryStep),
    GenerateDml(DmlSpec),
    ReturnError { message: Option<String> },
    ReturnSuccess { message: Option<String> },
    /// Unrecognized operation that names a flat `next_step` to follow.
    Unknown { operation: String },
}

impl StepKind {
    /// Operation tag.
    pub fn operation(&self) -> &str {
        match self {
            StepKind::Query(_) => OP_QUERY,
            StepKind::GenerateDml(_) => OP_GENERATE_DML,
            StepKind::ReturnError { .. } => OP_RETURN_ERROR,
            StepKind::ReturnSuccess { .. } => OP_RETURN_SUCCESS,
            StepKind::Unknown { operation } => operation,
        }
    }
}

/// One declared step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub number: u32,
    pub description: Option<String>,
    pub kind: StepKind,
    pub on_success: Option<Branch>,
    pub on_failure: Option<Branch>,
    /// Flat `next_step` key: `None` when absent, `Some(None)` when present
    /// and null (stop here), `Some(Some(n))` when it names a step.
    pub next_step: Option<Option<u32>>,
}

impl Step {
    pub fn new(number: u32, kind: StepKind) -> Self {
        Self {
            number,
            description: None,
            kind,
            on_success: None,
            on_failure: None,
            next_step: None,
        }
    }

    pub fn with_on_success(mut self, branch: Branch) -> Self {
        self.on_success = Some(branch);
        self
    }

    pub fn with_on_failure(mut self, branch: Branch) -> Self {
        self.on_failure = Some(branch);
        self
    }

    pub fn operation(&self) -> &str {
        self.kind.operation()
    }

    /// Every explicit target with the field that declares it.
    pub fn targets(&self) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        if let Some(ref b) = self.on_success {
            out.extend(b.targets().map(|(f, t)| (format!("on_success.{}", f), t)));
        }
        if let Some(ref b) = self.on_failure {
            out.extend(b.targets().map(|(f, t)| (format!("on_failure.{}", f), t)));
        }
        if let Some(Some(t)) = self.next_step {
            out.push(("next_step".to_string(), t));
        }
        out
    }

    /// Guard expressions with the branch that declares them.
    pub fn conditions(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let success = self
            .on_success
            .as_ref()
            .and_then(|b| b.condition.as_deref())
            .map(|c| ("on_success", c));
        let failure = self
            .on_failure
            .as_ref()
            .and_then(|b| b.condition.as_deref())
            .map(|c| ("on_failure", c));
        success.into_iter().chain(failure)
    }
}

/// A validated configuration with its step index.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub work_order_type: String,
    pub description: Option<String>,
    steps: BTreeMap<u32, Step>,
    /// Step numbers in declaration order.
    order: Vec<u32>,
}

impl StepConfig {
    /// Build the index. Callers are expected to have checked for duplicates.
    pub(crate) fn from_parts(
        work_order_type: String,
        description: Option<String>,
        steps: Vec<Step>,
    ) -> Self {
        let order = steps.iter().map(|s| s.number).collect();
        let steps = steps.into_iter().map(|s| (s.number, s)).collect();
        Self {
            work_order_type,
            description,
            steps,
            order,
        }
    }

    pub fn get(&self, number: u32) -> Option<&Step> {
        self.steps.get(&number)
    }

    pub fn contains(&self, number: u32) -> bool {
        self.steps.contains_key(&number)
    }

    /// Lowest declared step number.
    pub fn lowest_step(&self) -> Option<u32> {
        self.steps.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|n| self.steps.get(n))
    }

    /// GENERATE_DML steps in declaration order.
    pub fn dml_steps(&self) -> impl Iterator<Item = (&Step, &DmlSpec)> {
        self.steps().filter_map(|s| match &s.kind {
            StepKind::GenerateDml(spec) => Some((s, spec)),
            _ => None,
        })
    }
}

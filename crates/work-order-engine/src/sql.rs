//! DML statement assembly and risk estimation.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::template;

/// Supported DML statement types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DmlType {
    Insert,
    Update,
    Delete,
}

impl DmlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmlType::Insert => "INSERT",
            DmlType::Update => "UPDATE",
            DmlType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for DmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DmlType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INSERT" => Ok(DmlType::Insert),
            "UPDATE" => Ok(DmlType::Update),
            "DELETE" => Ok(DmlType::Delete),
            _ => Err(EngineError::UnsupportedDmlType(s.to_string())),
        }
    }
}

/// Risk of a generated statement. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Risk of a statement by type and WHERE clause.
///
/// | type   | no WHERE | WHERE  |
/// |--------|----------|--------|
/// | DELETE | high     | medium |
/// | UPDATE | high     | low    |
/// | INSERT | low      | low    |
///
/// Unrecognized types are `medium`.
pub fn estimate_risk(dml_type: &str, where_clause: Option<&str>) -> RiskLevel {
    match DmlType::from_str(dml_type) {
        Ok(t) => t.risk(where_clause),
        Err(_) => RiskLevel::Medium,
    }
}

impl DmlType {
    /// Risk of this statement type given its WHERE clause.
    pub fn risk(&self, where_clause: Option<&str>) -> RiskLevel {
        let unbounded = where_clause.map_or(true, |w| w.trim().is_empty());
        match (self, unbounded) {
            (DmlType::Delete, true) => RiskLevel::High,
            (DmlType::Delete, false) => RiskLevel::Medium,
            (DmlType::Update, true) => RiskLevel::High,
            (DmlType::Update, false) => RiskLevel::Low,
            (DmlType::Insert, _) => RiskLevel::Low,
        }
    }
}

/// Declarative description of one DML statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmlSpec {
    /// Statement type.
    #[serde(rename = "type")]
    pub dml_type: DmlType,

    /// Target table.
    pub table: String,

    /// Column -> value template for UPDATE.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,

    /// Column -> value template for INSERT.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,

    /// WHERE clause template for UPDATE/DELETE.
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
}

impl DmlSpec {
    /// Risk of the statement this spec produces.
    pub fn risk(&self) -> RiskLevel {
        self.dml_type.risk(self.where_clause.as_deref())
    }
}

/// Renders DML statements from specs and a context.
#[derive(Debug, Clone, Default)]
pub struct SqlBuilder;

impl SqlBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the SQL text for the DML spec declared at `step`.
    pub fn build(&self, step: u32, spec: &DmlSpec, ctx: &Context) -> EngineResult<String> {
        let where_sql = render_where(spec.where_clause.as_deref(), ctx);

        let sql = match spec.dml_type {
            DmlType::Update => {
                if spec.set.is_empty() {
                    return Err(EngineError::InvalidDml {
                        step,
                        reason: format!("UPDATE on {} has no 'set' columns", spec.table),
                    });
                }
                let assignments: Vec<String> = spec
                    .set
                    .iter()
                    .map(|(col, tmpl)| format!("{} = {}", col, template::render_value(tmpl, ctx)))
                    .collect();
                format!("UPDATE {} SET {}{}", spec.table, assignments.join(", "), where_sql)
            }
            DmlType::Delete => format!("DELETE FROM {}{}", spec.table, where_sql),
            DmlType::Insert => {
                if spec.values.is_empty() {
                    return Err(EngineError::InvalidDml {
                        step,
                        reason: format!("INSERT into {} has no 'values' columns", spec.table),
                    });
                }
                let columns: Vec<&str> = spec.values.keys().map(String::as_str).collect();
                let values: Vec<String> = spec
                    .values
                    .values()
                    .map(|tmpl| template::render_value(tmpl, ctx))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    spec.table,
                    columns.join(", "),
                    values.join(", ")
                )
            }
        };

        Ok(sql)
    }
}

/// Render an optional WHERE template to ` WHERE ...`, or nothing when blank.
fn render_where(where_clause: Option<&str>, ctx: &Context) -> String {
    match where_clause {
        Some(w) if !w.trim().is_empty() => {
            format!(" WHERE {}", format_predicate(&template::render_clause(w, ctx)))
        }
        _ => String::new(),
    }
}

/// Characters that form SQL operators.
const OPERATOR_CHARS: &[char] = &[
    '<', '>', '=', '!', '@', '-', '~', '|', '&', '#', '^', '*', '/', '%', '+',
];

/// Comparison operators whose spacing is normalised.
const COMPARISON_OPERATORS: [&str; 7] = ["=", "!=", "<>", "<", ">", "<=", ">="];

/// Surround comparison operators outside quoted text with single spaces.
///
/// `user_id=42` becomes `user_id = 42`; `note = 'a=b'` is unchanged. A run
/// of operator characters is one token, and runs that are not a plain
/// comparison (`->>`, `@>`, `<@`, `||`) are copied as written.
pub fn format_predicate(clause: &str) -> String {
    let chars: Vec<char> = clause.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' || c == '`' {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        if !OPERATOR_CHARS.contains(&c) {
            out.push(c);
            i += 1;
            continue;
        }

        let end = chars[i..]
            .iter()
            .position(|ch| !OPERATOR_CHARS.contains(ch))
            .map_or(chars.len(), |n| i + n);
        let run: String = chars[i..end].iter().collect();
        i = end;

        if !COMPARISON_OPERATORS.contains(&run.as_str()) {
            out.push_str(&run);
            continue;
        }

        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&run);
        out.push(' ');
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
    }

    out.trim_end().to_string()
}

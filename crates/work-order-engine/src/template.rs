//! SQL variable substitution.
//!
//! Renders `{name}` placeholders against a [`Context`] into SQL literals:
//!
//! - strings are single-quoted with embedded quotes doubled
//! - numbers and booleans are emitted unquoted
//! - missing or null variables become `NULL`
//!
//! A missing variable renders as `NULL`, not as the placeholder text. Inside a
//! WHERE clause `col = NULL` matches nothing, and inside a SET it clears the
//! column. Callers that cannot tolerate that should check
//! [`missing_placeholders`] first.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::context::Context;

/// The SQL null literal.
pub const NULL_LITERAL: &str = "NULL";

/// SQL expressions passed through verbatim (compared case-insensitively).
const SQL_KEYWORDS: [&str; 3] = ["NOW()", "CURRENT_TIMESTAMP()", "NULL"];

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"))
}

/// Render a SET/VALUES template into a SQL value expression.
pub fn render_value(template: &Value, ctx: &Context) -> String {
    match template {
        Value::Null => NULL_LITERAL.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => render_str(s, ctx),
        other => quote(&other.to_string()),
    }
}

/// Render a string template used as a value.
///
/// Templates without placeholders are constants: SQL keywords and
/// already-quoted literals pass through, digit strings stay unquoted and
/// anything else becomes a quoted string literal.
pub fn render_str(template: &str, ctx: &Context) -> String {
    if is_sql_keyword(template) {
        return template.to_string();
    }

    if has_placeholders(template) {
        return substitute(template, ctx);
    }

    if is_digits(template) || is_quoted_literal(template) {
        template.to_string()
    } else {
        quote(template)
    }
}

/// Render a clause template (WHERE).
///
/// Only placeholders are replaced; the surrounding text is SQL written by
/// the configuration author and is kept as is.
pub fn render_clause(template: &str, ctx: &Context) -> String {
    substitute(template, ctx)
}

/// Format a context value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => NULL_LITERAL.to_string(),
        Value::String(s) => quote(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => quote(&other.to_string()),
    }
}

/// Wrap a string in single quotes, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Returns true if the template contains at least one `{name}` token.
pub fn has_placeholders(template: &str) -> bool {
    placeholder_regex().is_match(template)
}

/// Names referenced by `{name}` tokens, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Placeholder names with no non-null value in the context.
pub fn missing_placeholders(template: &str, ctx: &Context) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|name| ctx.get_non_null(name).is_none())
        .collect()
}

/// Replace every `{name}` token with the SQL literal of its context value.
fn substitute(template: &str, ctx: &Context) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match ctx.get_non_null(name) {
                Some(value) => sql_literal(value),
                None => {
                    tracing::warn!(variable = %name, "Variable not found in context, rendering NULL");
                    NULL_LITERAL.to_string()
                }
            }
        })
        .into_owned()
}

fn is_sql_keyword(s: &str) -> bool {
    let trimmed = s.trim();
    SQL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(trimmed))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_quoted_literal(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'')
}

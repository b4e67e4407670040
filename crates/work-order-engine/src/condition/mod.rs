//! Branch condition evaluation.
//!
//! Conditions are small boolean expressions over context variables:
//!
//! - `{status} == '10'`
//! - `{marine_order_id} != null`
//! - `{status} in ['10', '11', '12']`
//! - `{amount} > 100 and {status} == 'active'`
//!
//! Evaluation runs in three stages. `{name}` placeholders are replaced with
//! literals of the variable's type, the result is tokenized and parsed by a
//! fixed grammar, and the tree is evaluated. Only literals, comparisons,
//! membership and boolean connectives exist; there are no names, calls or
//! attribute access.
//!
//! An empty condition is true. Any failure (deny-listed keyword, syntax
//! error, type error) makes [`ConditionEvaluator::evaluate`] return false.

mod lexer;
mod parser;
mod value;

use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::context::Context;

pub use parser::{CmpOp, Expr};
pub use value::Value;

/// Substrings rejected anywhere in a configured expression.
pub const DENIED_KEYWORDS: [&str; 12] = [
    "import", "exec", "eval", "compile", "open", "file", "__", "lambda", "def", "class", "yield",
    "del",
];

/// Errors raised while evaluating a condition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    /// Expression contains a deny-listed keyword.
    #[error("Expression contains forbidden keyword: {0}")]
    Forbidden(String),

    /// Tokenizer failure.
    #[error("Lex error at {position}: {message}")]
    Lex { position: usize, message: String },

    /// Parser failure.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Bare identifier outside a placeholder.
    #[error("Unknown name: {0}")]
    UnknownName(String),

    /// Operands of incompatible types.
    #[error("Type error: {0}")]
    Type(String),
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"))
}

/// Evaluates branch conditions against a run context.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition; errors are logged and yield `false`.
    pub fn evaluate(&self, expression: &str, ctx: &Context) -> bool {
        if expression.trim().is_empty() {
            tracing::warn!("Empty condition expression, defaulting to true");
            return true;
        }

        match self.try_evaluate(expression, ctx) {
            Ok(result) => {
                tracing::debug!(expression = %expression, result, "Condition evaluated");
                result
            }
            Err(e) => {
                tracing::error!(expression = %expression, error = %e, "Condition evaluation failed");
                false
            }
        }
    }

    /// Evaluate a condition, surfacing the error instead of defaulting.
    pub fn try_evaluate(&self, expression: &str, ctx: &Context) -> Result<bool, ConditionError> {
        if expression.trim().is_empty() {
            return Ok(true);
        }

        check_denied(expression)?;

        let substituted = substitute_variables(expression, ctx);
        tracing::debug!(expression = %expression, substituted = %substituted, "Condition variables replaced");

        let tokens = lexer::tokenize(&substituted)?;
        let expr = parser::parse(&tokens)?;
        Ok(eval(&expr)?.is_truthy())
    }

    /// Static check of a configured expression: deny-list and syntax.
    ///
    /// Placeholders are bound to null, so only shape is verified; type
    /// errors that depend on runtime values are not detected.
    pub fn check(&self, expression: &str) -> Result<(), ConditionError> {
        if expression.trim().is_empty() {
            return Ok(());
        }
        check_denied(expression)?;
        let substituted = substitute_variables(expression, &Context::new());
        let tokens = lexer::tokenize(&substituted)?;
        parser::parse(&tokens).map(|_| ())
    }
}

/// Convenience wrapper around [`ConditionEvaluator::evaluate`].
pub fn evaluate_condition(expression: &str, ctx: &Context) -> bool {
    ConditionEvaluator::new().evaluate(expression, ctx)
}

/// Reject deny-listed substrings in the configured text, placeholders masked.
fn check_denied(expression: &str) -> Result<(), ConditionError> {
    let masked = placeholder_regex().replace_all(expression, "{}");
    for keyword in DENIED_KEYWORDS {
        if masked.contains(keyword) {
            return Err(ConditionError::Forbidden(keyword.to_string()));
        }
    }
    Ok(())
}

/// Replace `{name}` tokens with literals of the variable's type.
fn substitute_variables(expression: &str, ctx: &Context) -> String {
    placeholder_regex()
        .replace_all(expression, |caps: &Captures<'_>| {
            match ctx.get(&caps[1]) {
                None | Some(serde_json::Value::Null) => "None".to_string(),
                Some(serde_json::Value::Bool(true)) => "True".to_string(),
                Some(serde_json::Value::Bool(false)) => "False".to_string(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::String(s)) => quote_literal(s),
                Some(other) => quote_literal(&other.to_string()),
            }
        })
        .into_owned()
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn eval(expr: &Expr) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => Ok(Value::List(
            items.iter().map(eval).collect::<Result<_, _>>()?,
        )),
        Expr::Neg(inner) => eval(inner)?.negate(),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner)?.is_truthy())),
        Expr::And(operands) => {
            let mut last = Value::Bool(true);
            for operand in operands {
                last = eval(operand)?;
                if !last.is_truthy() {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Or(operands) => {
            let mut last = Value::Bool(false);
            for operand in operands {
                last = eval(operand)?;
                if last.is_truthy() {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Compare { first, rest } => {
            let mut left = eval(first)?;
            for (op, operand) in rest {
                let right = eval(operand)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    use std::cmp::Ordering;

    Ok(match op {
        CmpOp::Eq => left.loose_eq(right),
        CmpOp::Ne => !left.loose_eq(right),
        CmpOp::Lt => left.compare(right)? == Ordering::Less,
        CmpOp::Gt => left.compare(right)? == Ordering::Greater,
        CmpOp::Le => left.compare(right)? != Ordering::Greater,
        CmpOp::Ge => left.compare(right)? != Ordering::Less,
        CmpOp::In => left.contained_in(right)?,
        CmpOp::NotIn => !left.contained_in(right)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        let mut ctx = Context::new();
        ctx.set("status", json!("10"));
        ctx.set("amount", json!(150));
        ctx.set("price", json!(9.5));
        ctx.set("active", json!(true));
        ctx.set("note", json!("it's null"));
        ctx.set("marine_order_id", serde_json::Value::Null);
        ctx
    }

    #[test]
    fn test_empty_expression_is_true() {
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate("", &ctx()));
        assert!(evaluator.evaluate("   ", &Context::new()));
    }

    #[test]
    fn test_equality() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert!(evaluator.evaluate("{status} == '10'", &ctx));
        assert!(!evaluator.evaluate("{status} == 10", &ctx));
        assert!(evaluator.evaluate("{status} != '11'", &ctx));
        assert!(evaluator.evaluate("{active} == true", &ctx));
    }

    #[test]
    fn test_null_checks() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert!(evaluator.evaluate("{marine_order_id} == null", &ctx));
        assert!(!evaluator.evaluate("{marine_order_id} != null", &ctx));
        assert!(evaluator.evaluate("{undefined_var} == null", &ctx));
        assert!(evaluator.evaluate("{status} != null", &ctx));
    }

    #[test]
    fn test_ordering_and_logic() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert!(evaluator.evaluate("{amount} > 100 and {status} == '10'", &ctx));
        assert!(evaluator.evaluate("{amount} < 100 or {price} >= 9.5", &ctx));
        assert!(evaluator.evaluate("not {amount} <= 100", &ctx));
        assert!(evaluator.evaluate("100 < {amount} < 200", &ctx));
        assert!(!evaluator.evaluate("100 < {amount} < 120", &ctx));
        assert!(evaluator.evaluate("-{price} < 0", &ctx));
    }

    #[test]
    fn test_membership() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert!(evaluator.evaluate("{status} in ['10', '11', '12']", &ctx));
        assert!(!evaluator.evaluate("{status} not in ['10', '11']", &ctx));
        assert!(evaluator.evaluate("'null' in {note}", &ctx));
    }

    #[test]
    fn test_string_values_are_not_rewritten() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert!(evaluator.evaluate("{note} == \"it's null\"", &ctx));
    }

    #[test]
    fn test_malformed_expressions_are_false() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        for expr in [
            "{status} ==",
            "{status} = '10'",
            "status == '10'",
            "{marine_order_id} > 1",
            "(((",
            "'unterminated",
            "{amount} in 5",
            "; DROP TABLE x",
        ] {
            assert!(!evaluator.evaluate(expr, &ctx), "expected false for {:?}", expr);
        }
    }

    #[test]
    fn test_deeply_nested_expressions_are_false() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        for n in [1_000, 10_000] {
            let parens = format!("{}1 == 1{}", "(".repeat(n), ")".repeat(n));
            assert!(!evaluator.evaluate(&parens, &ctx));
            assert!(evaluator.check(&parens).is_err());
            assert!(!evaluator.evaluate(&format!("{}1", "not ".repeat(n)), &ctx));
            assert!(!evaluator.evaluate(&format!("{} in [1]", "[".repeat(n)), &ctx));
        }

        let long_chain = vec!["{amount} > 1"; 10_000].join(" and ");
        assert!(evaluator.evaluate(&long_chain, &ctx));
        assert!(evaluator.evaluate("((({amount} > 1)))", &ctx));
    }

    #[test]
    fn test_denied_keywords() {
        let evaluator = ConditionEvaluator::new();
        let ctx = ctx();
        assert_eq!(
            evaluator.try_evaluate("__import__('os')", &ctx),
            Err(ConditionError::Forbidden("import".to_string()))
        );
        assert!(!evaluator.evaluate("lambda: 1", &ctx));
        assert!(matches!(
            evaluator.try_evaluate("{status} == 'open'", &ctx),
            Err(ConditionError::Forbidden(_))
        ));
    }

    #[test]
    fn test_deny_list_ignores_placeholder_names_and_values() {
        let evaluator = ConditionEvaluator::new();
        let mut ctx = Context::new();
        ctx.set("model_id", json!("open"));
        assert!(evaluator.evaluate("{model_id} != null", &ctx));
    }

    #[test]
    fn test_check() {
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.check("{a} == 1 and {b} in [1, 2]").is_ok());
        assert!(evaluator.check("").is_ok());
        assert!(evaluator.check("{a} ==").is_err());
        assert!(evaluator.check("eval('1')").is_err());
    }

    #[test]
    fn test_evaluate_condition_helper() {
        assert!(evaluate_condition("{amount} >= 150", &ctx()));
    }
}

//! Step configuration parser.
//!
//! Parses JSON configuration files into a [`StepConfig`] and validates:
//! - `work_order_type` and a non-empty `steps` list
//! - each step's `step` number and `operation`
//! - required fields per operation (QUERY: `table`; GENERATE_DML: `type`, `table`)
//! - duplicate step numbers
//! - branch and `next_step` targets (when references are checked)

use std::collections::HashSet;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::condition::ConditionEvaluator;
use crate::error::ConfigError;
use crate::sql::{DmlSpec, DmlType};
use crate::steps::types::{
    Branch, QueryStep, Step, StepConfig, StepKind, OP_GENERATE_DML, OP_QUERY, OP_RETURN_ERROR,
    OP_RETURN_SUCCESS,
};

/// Parse behaviour switches.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Reject explicit targets that name undeclared steps.
    pub check_references: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            check_references: true,
        }
    }
}

/// Parse a JSON string into a validated configuration.
pub fn parse_step_config(json: &str, options: &ParseOptions) -> Result<StepConfig, ConfigError> {
    let value: Value = serde_json::from_str(json)?;
    step_config_from_value(&value, options)
}

/// Build a validated configuration from parsed JSON.
pub fn step_config_from_value(
    value: &Value,
    options: &ParseOptions,
) -> Result<StepConfig, ConfigError> {
    let root = value.as_object().ok_or_else(|| ConfigError::MissingField {
        field: "(root object)".to_string(),
    })?;

    let work_order_type = root
        .get("work_order_type")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            field: "work_order_type".to_string(),
        })?
        .to_string();

    let description = root
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw_steps = root
        .get("steps")
        .and_then(Value::as_array)
        .filter(|steps| !steps.is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            field: "steps".to_string(),
        })?;

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut seen = HashSet::new();
    for (idx, raw) in raw_steps.iter().enumerate() {
        let step = parse_step(raw, idx)?;
        if !seen.insert(step.number) {
            return Err(ConfigError::DuplicateStep(step.number));
        }
        steps.push(step);
    }

    if options.check_references {
        validate_references(&steps)?;
    }

    check_conditions(&work_order_type, &steps);

    Ok(StepConfig::from_parts(work_order_type, description, steps))
}

/// Parse one step object. `idx` is its position, used to label errors
/// before the step number is known.
fn parse_step(raw: &Value, idx: usize) -> Result<Step, ConfigError> {
    let position = format!("#{}", idx + 1);

    let obj = raw.as_object().ok_or_else(|| ConfigError::InvalidStep {
        step: position.clone(),
        field: "(step)".to_string(),
        reason: "must be an object".to_string(),
    })?;

    let number = match obj.get("step") {
        Some(v) => as_step_number(v).ok_or_else(|| ConfigError::InvalidStep {
            step: position.clone(),
            field: "step".to_string(),
            reason: format!("must be a non-negative integer, got {}", v),
        })?,
        None => {
            return Err(ConfigError::InvalidStep {
                step: position,
                field: "step".to_string(),
                reason: "is required".to_string(),
            })
        }
    };

    let label = number.to_string();
    let operation = required_str(obj, "operation", &label)?;
    let next_step = parse_flat_next(obj, &label)?;

    let kind = match operation.as_str() {
        OP_QUERY => StepKind::Query(QueryStep {
            table: required_str(obj, "table", &label)?,
            where_clause: optional_str(obj, "where", &label)?,
            output_fields: parse_output_fields(obj, &label)?,
        }),
        OP_GENERATE_DML => StepKind::GenerateDml(parse_dml(obj, &label)?),
        OP_RETURN_ERROR => StepKind::ReturnError {
            message: optional_str(obj, "message", &label)?,
        },
        OP_RETURN_SUCCESS => StepKind::ReturnSuccess {
            message: optional_str(obj, "message", &label)?,
        },
        other if next_step.is_some() => {
            tracing::warn!(step = number, operation = %other, "Unknown operation, step will follow its next_step");
            StepKind::Unknown {
                operation: other.to_string(),
            }
        }
        other => {
            return Err(ConfigError::InvalidStep {
                step: label,
                field: "operation".to_string(),
                reason: format!(
                    "has unknown value '{}' (expected {}, {}, {} or {})",
                    other, OP_QUERY, OP_GENERATE_DML, OP_RETURN_ERROR, OP_RETURN_SUCCESS
                ),
            })
        }
    };

    Ok(Step {
        number,
        description: optional_str(obj, "description", &label)?,
        kind,
        on_success: parse_branch(obj, "on_success", &label)?,
        on_failure: parse_branch(obj, "on_failure", &label)?,
        next_step,
    })
}

fn parse_dml(obj: &Map<String, Value>, label: &str) -> Result<DmlSpec, ConfigError> {
    let type_name = required_str(obj, "type", label)?;
    let dml_type = DmlType::from_str(&type_name).map_err(|_| ConfigError::InvalidStep {
        step: label.to_string(),
        field: "type".to_string(),
        reason: format!("has unsupported DML type '{}'", type_name),
    })?;

    let table = required_str(obj, "table", label)?;
    let set = optional_object(obj, "set", label)?;
    let values = optional_object(obj, "values", label)?;

    match dml_type {
        DmlType::Update if set.is_empty() => {
            return Err(invalid(label, "set", "is required for UPDATE"));
        }
        DmlType::Insert if values.is_empty() => {
            return Err(invalid(label, "values", "is required for INSERT"));
        }
        _ => {}
    }

    Ok(DmlSpec {
        dml_type,
        table,
        set,
        values,
        where_clause: optional_str(obj, "where", label)?,
    })
}

fn parse_output_fields(obj: &Map<String, Value>, label: &str) -> Result<Vec<String>, ConfigError> {
    match obj.get("output_fields") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(label, "output_fields", "must contain only strings"))
            })
            .collect(),
        Some(_) => Err(invalid(label, "output_fields", "must be a list of column names")),
    }
}

fn parse_branch(
    obj: &Map<String, Value>,
    field: &str,
    label: &str,
) -> Result<Option<Branch>, ConfigError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| invalid(label, field, &format!("is not a valid branch: {}", e))),
        Some(_) => Err(invalid(label, field, "must be an object")),
    }
}

/// Flat `next_step`: absent, explicitly null, or a step number.
fn parse_flat_next(obj: &Map<String, Value>, label: &str) -> Result<Option<Option<u32>>, ConfigError> {
    match obj.get("next_step") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => as_step_number(v)
            .map(|n| Some(Some(n)))
            .ok_or_else(|| invalid(label, "next_step", "must be a step number or null")),
    }
}

/// Check every explicit target against the declared step numbers.
fn validate_references(steps: &[Step]) -> Result<(), ConfigError> {
    let declared: HashSet<u32> = steps.iter().map(|s| s.number).collect();

    for step in steps {
        for (field, target) in step.targets() {
            if !declared.contains(&target) {
                return Err(ConfigError::DanglingReference {
                    step: step.number,
                    field,
                    target,
                });
            }
        }
    }

    Ok(())
}

/// Warn about guards that can never evaluate cleanly. These are not rejected:
/// a failing guard takes the else path at run time.
fn check_conditions(work_order_type: &str, steps: &[Step]) {
    let evaluator = ConditionEvaluator::new();
    for step in steps {
        for (branch, condition) in step.conditions() {
            if let Err(e) = evaluator.check(condition) {
                tracing::warn!(
                    work_order_type = %work_order_type,
                    step = step.number,
                    branch = branch,
                    condition = %condition,
                    error = %e,
                    "Branch condition will not evaluate, else_step will be taken"
                );
            }
        }
    }
}

fn as_step_number(v: &Value) -> Option<u32> {
    v.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn required_str(obj: &Map<String, Value>, field: &str, label: &str) -> Result<String, ConfigError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(invalid(label, field, "must not be empty")),
        Some(_) => Err(invalid(label, field, "must be a string")),
        None => Err(invalid(label, field, "is required")),
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    field: &str,
    label: &str,
) -> Result<Option<String>, ConfigError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(label, field, "must be a string")),
    }
}

fn optional_object(
    obj: &Map<String, Value>,
    field: &str,
    label: &str,
) -> Result<Map<String, Value>, ConfigError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(invalid(label, field, "must be an object of column templates")),
    }
}

fn invalid(label: &str, field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidStep {
        step: label.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<StepConfig, ConfigError> {
        step_config_from_value(&value, &ParseOptions::default())
    }

    #[test]
    fn test_parse_cancel_order() {
        let config = parse(json!({
            "work_order_type": "cancel_order",
            "description": "Cancel an order",
            "steps": [
                {
                    "step": 1,
                    "operation": "QUERY",
                    "table": "orders",
                    "where": "user_id={uid}",
                    "output_fields": ["status"],
                    "on_success": {"condition": "{status} != null", "next_step": 2, "else_step": 3}
                },
                {
                    "step": 2,
                    "operation": "GENERATE_DML",
                    "type": "UPDATE",
                    "table": "orders",
                    "set": {"status": "'cancelled'"},
                    "where": "user_id={uid}"
                },
                {"step": 3, "operation": "RETURN_ERROR", "message": "order not found"}
            ]
        }))
        .unwrap();

        assert_eq!(config.work_order_type, "cancel_order");
        assert_eq!(config.description.as_deref(), Some("Cancel an order"));
        assert_eq!(config.len(), 3);

        let first = config.get(1).unwrap();
        assert_eq!(first.operation(), "QUERY");
        let branch = first.on_success.as_ref().unwrap();
        assert_eq!(branch.next_step, Some(2));
        assert_eq!(branch.else_step, Some(3));
        assert!(first.next_step.is_none());

        match &config.get(2).unwrap().kind {
            StepKind::GenerateDml(spec) => {
                assert_eq!(spec.dml_type, DmlType::Update);
                assert_eq!(spec.set.get("status"), Some(&json!("'cancelled'")));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_missing_top_level_fields() {
        let err = parse(json!({"steps": [{"step": 1, "operation": "RETURN_SUCCESS"}]})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "work_order_type"));

        let err = parse(json!({"work_order_type": "x", "steps": []})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "steps"));
    }

    #[test]
    fn test_invalid_step_names_step_and_field() {
        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"step": 4, "operation": "QUERY", "where": "id = 1"}]
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid step 4: field 'table' is required");

        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"operation": "QUERY", "table": "t"}]
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid step #1: field 'step' is required");

        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"step": 2, "operation": "GENERATE_DML", "table": "t"}]
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid step 2: field 'type' is required");
    }

    #[test]
    fn test_unsupported_dml_type() {
        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"step": 1, "operation": "GENERATE_DML", "type": "MERGE", "table": "t"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { ref field, .. } if field == "type"));
    }

    #[test]
    fn test_update_requires_set() {
        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"step": 1, "operation": "GENERATE_DML", "type": "UPDATE", "table": "t", "where": "id = 1"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { ref field, .. } if field == "set"));
    }

    #[test]
    fn test_duplicate_steps() {
        let err = parse(json!({
            "work_order_type": "x",
            "steps": [
                {"step": 1, "operation": "RETURN_SUCCESS"},
                {"step": 1, "operation": "RETURN_ERROR"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStep(1)));
    }

    #[test]
    fn test_dangling_reference() {
        let config = json!({
            "work_order_type": "x",
            "steps": [
                {"step": 1, "operation": "QUERY", "table": "t", "on_success": {"next_step": 5}}
            ]
        });

        let err = parse(config.clone()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DanglingReference { step: 1, target: 5, ref field } if field == "on_success.next_step"
        ));

        let lenient = step_config_from_value(
            &config,
            &ParseOptions {
                check_references: false,
            },
        );
        assert!(lenient.is_ok());
    }

    #[test]
    fn test_flat_next_step_tri_state() {
        let config = parse(json!({
            "work_order_type": "x",
            "steps": [
                {"step": 1, "operation": "QUERY", "table": "t"},
                {"step": 2, "operation": "QUERY", "table": "t", "next_step": null},
                {"step": 3, "operation": "QUERY", "table": "t", "next_step": 1}
            ]
        }))
        .unwrap();

        assert_eq!(config.get(1).unwrap().next_step, None);
        assert_eq!(config.get(2).unwrap().next_step, Some(None));
        assert_eq!(config.get(3).unwrap().next_step, Some(Some(1)));
    }

    #[test]
    fn test_unknown_operation() {
        let err = parse(json!({
            "work_order_type": "x",
            "steps": [{"step": 1, "operation": "NOTIFY"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStep { ref field, .. } if field == "operation"));

        let config = parse(json!({
            "work_order_type": "x",
            "steps": [
                {"step": 1, "operation": "NOTIFY", "next_step": 2},
                {"step": 2, "operation": "RETURN_SUCCESS"}
            ]
        }))
        .unwrap();
        assert_eq!(
            config.get(1).unwrap().kind,
            StepKind::Unknown {
                operation: "NOTIFY".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_condition_is_accepted() {
        let config = parse(json!({
            "work_order_type": "x",
            "steps": [
                {"step": 1, "operation": "QUERY", "table": "t",
                 "on_success": {"condition": "{a} ==", "next_step": 2, "else_step": 2}},
                {"step": 2, "operation": "RETURN_SUCCESS"}
            ]
        }));
        assert!(config.is_ok());
    }

    #[test]
    fn test_parse_step_config_from_str() {
        assert!(matches!(
            parse_step_config("{not json", &ParseOptions::default()),
            Err(ConfigError::Parse(_))
        ));
        let config = parse_step_config(
            r#"{"work_order_type": "noop", "steps": [{"step": 1, "operation": "RETURN_SUCCESS", "message": "done"}]}"#,
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(
            config.get(1).unwrap().kind,
            StepKind::ReturnSuccess {
                message: Some("done".to_string())
            }
        );
    }
}

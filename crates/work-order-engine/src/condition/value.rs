//! Runtime values and comparison rules for condition evaluation.

use std::cmp::Ordering;

use super::ConditionError;

/// A value produced while evaluating a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Truthiness: null, false, zero, empty string and empty list are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    /// Numeric view; booleans count as 0/1.
    fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Equality with numeric coercion between ints, floats and bools.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.compare(b) == Some(Ordering::Equal);
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }

    /// Ordering between numbers or between strings; anything else is a type error.
    pub fn compare(&self, other: &Value) -> Result<Ordering, ConditionError> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.compare(b).ok_or_else(|| {
                ConditionError::Type("comparison involving NaN".to_string())
            });
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(ConditionError::Type(format!(
                "cannot order {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Membership: element of a list, or substring of a string.
    pub fn contained_in(&self, container: &Value) -> Result<bool, ConditionError> {
        match (self, container) {
            (_, Value::List(items)) => Ok(items.iter().any(|item| self.loose_eq(item))),
            (Value::Str(needle), Value::Str(haystack)) => Ok(haystack.contains(needle.as_str())),
            _ => Err(ConditionError::Type(format!(
                "'in' requires a list or string on the right, found {} in {}",
                self.type_name(),
                container.type_name()
            ))),
        }
    }

    /// Arithmetic negation.
    pub fn negate(&self) -> Result<Value, ConditionError> {
        match self {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| ConditionError::Type("integer overflow".to_string())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
            other => Err(ConditionError::Type(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (Number::Int(a), Number::Float(b)) => (a as f64).partial_cmp(&b),
            (Number::Float(a), Number::Int(b)) => a.partial_cmp(&(b as f64)),
            (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
        }
    }
}

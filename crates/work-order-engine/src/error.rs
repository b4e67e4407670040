//! Engine error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable codes carried on a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid or inconsistent step configuration.
    ConfigurationError,
    /// A step number was resolved that the configuration does not declare.
    StepNotFound,
    /// A QUERY step failed and no failure branch handled it.
    QueryFailed,
    /// The iteration ceiling was exceeded.
    LoopGuardExceeded,
    /// The caller cancelled the run.
    Cancelled,
    /// A DML descriptor names a type other than INSERT/UPDATE/DELETE.
    UnsupportedDmlType,
    /// A RETURN_ERROR step ended the run.
    ReturnError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::StepNotFound => "STEP_NOT_FOUND",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::LoopGuardExceeded => "LOOP_GUARD_EXCEEDED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UnsupportedDmlType => "UNSUPPORTED_DML_TYPE",
            ErrorCode::ReturnError => "RETURN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised while loading or validating a step configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file exists for the work order type.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// The configuration is not well-formed JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A top-level field is missing or has the wrong shape.
    #[error("Invalid configuration: missing or invalid field '{field}'")]
    MissingField { field: String },

    /// A step is missing a required field or carries an invalid value.
    #[error("Invalid step {step}: field '{field}' {reason}")]
    InvalidStep {
        step: String,
        field: String,
        reason: String,
    },

    /// Two steps share the same number.
    #[error("Duplicate step number: {0}")]
    DuplicateStep(u32),

    /// A branch or next_step targets an undeclared step.
    #[error("Step {step}: '{field}' references undeclared step {target}")]
    DanglingReference { step: u32, field: String, target: u32 },

    /// I/O failure while reading configuration files.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Step not declared in the configuration.
    #[error("Step {0} not found in configuration")]
    StepNotFound(u32),

    /// Query step failed.
    #[error("Query failed at step {step}: {message}")]
    QueryFailed { step: u32, message: String },

    /// Iteration ceiling exceeded.
    #[error("Iteration limit of {0} steps exceeded, configuration is cyclic or runaway")]
    LoopGuard(usize),

    /// Run cancelled by the caller.
    #[error("Run cancelled after {0} steps")]
    Cancelled(usize),

    /// DML type outside INSERT/UPDATE/DELETE.
    #[error("Unsupported DML type: {0}")]
    UnsupportedDmlType(String),

    /// DML descriptor lacks a field its type requires.
    #[error("Invalid DML at step {step}: {reason}")]
    InvalidDml { step: u32, reason: String },

    /// Environment configuration could not be read.
    #[error("Settings error: {0}")]
    Settings(String),
}

impl EngineError {
    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Config(_) | EngineError::InvalidDml { .. } | EngineError::Settings(_) => {
                ErrorCode::ConfigurationError
            }
            EngineError::StepNotFound(_) => ErrorCode::StepNotFound,
            EngineError::QueryFailed { .. } => ErrorCode::QueryFailed,
            EngineError::LoopGuard(_) => ErrorCode::LoopGuardExceeded,
            EngineError::Cancelled(_) => ErrorCode::Cancelled,
            EngineError::UnsupportedDmlType(_) => ErrorCode::UnsupportedDmlType,
        }
    }
}

impl From<envy::Error> for EngineError {
    fn from(e: envy::Error) -> Self {
        EngineError::Settings(e.to_string())
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

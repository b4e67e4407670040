//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::InterpreterOptions;
use crate::error::EngineResult;
use crate::query::PostgresSettings;
use crate::steps::ParseOptions;

/// Engine configuration.
///
/// Environment variables are prefixed with `WORK_ORDER_`:
/// - `WORK_ORDER_STEPS_DIR`: Step configuration directory (default: "resources/mutation_steps")
/// - `WORK_ORDER_MAX_ITERATIONS`: Iteration ceiling per run (default: 100)
/// - `WORK_ORDER_START_STEP`: Default start step (optional, lowest declared step otherwise)
/// - `WORK_ORDER_STRICT_REFERENCES`: Reject undeclared branch targets at load (default: true)
/// - `WORK_ORDER_DATABASE_URL`: PostgreSQL connection string (optional)
/// - `WORK_ORDER_QUERY_MAX_RETRIES`: Attempts per query (default: 3)
/// - `WORK_ORDER_QUERY_RETRY_DELAY_MS`: Delay between attempts (default: 1000)
/// - `WORK_ORDER_QUERY_TIMEOUT_SECS`: Per-query timeout (default: 30)
/// - `WORK_ORDER_RUN_TIMEOUT_SECS`: Wall-clock budget per run (optional)
/// - `WORK_ORDER_LOG_FORMAT`: "text" or "json" (default: "text")
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_steps_dir")]
    pub steps_dir: PathBuf,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub start_step: Option<u32>,

    #[serde(default = "default_true")]
    pub strict_references: bool,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_query_max_retries")]
    pub query_max_retries: u32,

    #[serde(default = "default_query_retry_delay_ms")]
    pub query_retry_delay_ms: u64,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_steps_dir() -> PathBuf {
    PathBuf::from("resources/mutation_steps")
}

fn default_max_iterations() -> usize {
    crate::engine::DEFAULT_MAX_ITERATIONS
}

fn default_true() -> bool {
    true
}

fn default_query_max_retries() -> u32 {
    3
}

fn default_query_retry_delay_ms() -> u64 {
    1000
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            steps_dir: default_steps_dir(),
            max_iterations: default_max_iterations(),
            start_step: None,
            strict_references: true,
            database_url: None,
            query_max_retries: default_query_max_retries(),
            query_retry_delay_ms: default_query_retry_delay_ms(),
            query_timeout_secs: default_query_timeout_secs(),
            run_timeout_secs: None,
            log_format: default_log_format(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `WORK_ORDER_*` environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Ok(envy::prefixed("WORK_ORDER_").from_env::<EngineConfig>()?)
    }

    /// Load configuration from an explicit variable list (tests, embedding).
    pub fn from_vars<I>(vars: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed("WORK_ORDER_").from_iter::<_, EngineConfig>(vars)?)
    }

    pub fn interpreter_options(&self) -> InterpreterOptions {
        InterpreterOptions {
            max_iterations: self.max_iterations,
            start_step: self.start_step,
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            check_references: self.strict_references,
        }
    }

    /// PostgreSQL settings, when a database URL is configured.
    pub fn postgres_settings(&self) -> Option<PostgresSettings> {
        self.database_url.as_ref().map(|url| PostgresSettings {
            url: url.clone(),
            max_retries: self.query_max_retries,
            retry_delay: Duration::from_millis(self.query_retry_delay_ms),
            timeout: Duration::from_secs(self.query_timeout_secs),
        })
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.steps_dir, PathBuf::from("resources/mutation_steps"));
        assert_eq!(config.max_iterations, 100);
        assert!(config.strict_references);
        assert!(config.start_step.is_none());
        assert!(config.postgres_settings().is_none());
        assert!(!config.json_logs());
    }

    #[test]
    fn test_from_vars() {
        let config = EngineConfig::from_vars(vars(&[
            ("WORK_ORDER_STEPS_DIR", "/etc/work-orders"),
            ("WORK_ORDER_MAX_ITERATIONS", "25"),
            ("WORK_ORDER_START_STEP", "10"),
            ("WORK_ORDER_STRICT_REFERENCES", "false"),
            ("WORK_ORDER_DATABASE_URL", "postgresql://localhost/orders"),
            ("WORK_ORDER_QUERY_MAX_RETRIES", "5"),
            ("WORK_ORDER_RUN_TIMEOUT_SECS", "60"),
            ("WORK_ORDER_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.steps_dir, PathBuf::from("/etc/work-orders"));
        assert_eq!(config.interpreter_options().max_iterations, 25);
        assert_eq!(config.interpreter_options().start_step, Some(10));
        assert!(!config.parse_options().check_references);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(60)));
        assert!(config.json_logs());

        let pg = config.postgres_settings().unwrap();
        assert_eq!(pg.max_retries, 5);
        assert_eq!(pg.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_value() {
        let err = EngineConfig::from_vars(vars(&[("WORK_ORDER_MAX_ITERATIONS", "many")])).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigurationError);
    }
}

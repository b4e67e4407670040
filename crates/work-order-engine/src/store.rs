//! Step configuration store.
//!
//! Loads `<dir>/<work_order_type>.json` on first use and caches the parsed
//! configuration. Concurrent first requests for the same name share a single
//! parse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::steps::{parse_step_config, ParseOptions, StepConfig};

/// File stem excluded from listings.
const SCHEMA_STEM: &str = "schema";

type Slot = Arc<OnceCell<Arc<StepConfig>>>;

/// Cache of parsed step configurations keyed by work order type.
pub struct StepConfigStore {
    dir: PathBuf,
    options: ParseOptions,
    slots: Mutex<HashMap<String, Slot>>,
    parses: AtomicUsize,
}

impl StepConfigStore {
    pub fn new(dir: impl Into<PathBuf>, options: ParseOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            slots: Mutex::new(HashMap::new()),
            parses: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.steps_dir.clone(), config.parse_options())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files parsed so far.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    /// Get a configuration, loading it on first access.
    pub async fn get(&self, work_order_type: &str) -> Result<Arc<StepConfig>, ConfigError> {
        validate_name(work_order_type)?;

        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(work_order_type.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        match slot.get_or_try_init(|| self.load(work_order_type)).await {
            Ok(config) => Ok(config.clone()),
            Err(e) => {
                // Failed loads keep no slot
                let mut slots = self.slots.lock().await;
                let stale = slots
                    .get(work_order_type)
                    .is_some_and(|s| Arc::ptr_eq(s, &slot) && !s.initialized());
                if stale {
                    slots.remove(work_order_type);
                }
                Err(e)
            }
        }
    }

    /// Work order types with a configuration file, sorted.
    pub async fn list_types(&self) -> Result<Vec<String>, ConfigError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %self.dir.display(), "Step configuration directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut types = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != SCHEMA_STEM {
                    types.push(stem.to_string());
                }
            }
        }

        types.sort();
        Ok(types)
    }

    /// Load and validate every listed configuration.
    pub async fn validate_all(
        &self,
    ) -> Result<Vec<(String, Result<Arc<StepConfig>, ConfigError>)>, ConfigError> {
        let mut results = Vec::new();
        for name in self.list_types().await? {
            let result = self.get(&name).await;
            results.push((name, result));
        }
        Ok(results)
    }

    async fn load(&self, work_order_type: &str) -> Result<Arc<StepConfig>, ConfigError> {
        let path = self.dir.join(format!("{}.json", work_order_type));

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Step configuration not found");
                return Err(ConfigError::NotFound(work_order_type.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        self.parses.fetch_add(1, Ordering::SeqCst);
        let config = parse_step_config(&content, &self.options).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Invalid step configuration");
            e
        })?;

        if config.work_order_type != work_order_type {
            tracing::warn!(
                file = %work_order_type,
                declared = %config.work_order_type,
                "work_order_type does not match file name"
            );
        }

        tracing::info!(
            work_order_type = %work_order_type,
            steps = config.len(),
            "Loaded step configuration"
        );

        Ok(Arc::new(config))
    }
}

/// Names map to file stems; path components are not allowed.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::NotFound(name.to_string()))
    }
}

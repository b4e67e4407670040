//! Run context shared between steps.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Variables threaded through one interpreter run.
///
/// Seeded from extracted entities, extended by QUERY steps and read by
/// every template and condition evaluation. Entries are only ever
/// inserted or overwritten.
///
/// Storage is copy-on-write: [`Context::snapshot`] is an `Arc` clone and
/// later writes to the live context never reach a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    variables: Arc<Map<String, Value>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with the given variables.
    pub fn from_map(variables: Map<String, Value>) -> Self {
        Self {
            variables: Arc::new(variables),
        }
    }

    /// Set a variable value, overwriting any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.variables).insert(name.into(), value);
    }

    /// Get a variable value. Explicit nulls are returned as `Some(Null)`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Get a variable, treating explicit nulls as absent.
    pub fn get_non_null(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).filter(|v| !v.is_null())
    }

    /// Returns true if the key is present (even when its value is null).
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> Context {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self::from_map(map)
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.variables.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Context::from_map)
    }
}

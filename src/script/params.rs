//! Run-scoped parameter store.
//!
//! Steps that need to hand data to later steps do so through an explicitly
//! injected [`ScriptParams`] rather than a process-wide singleton, keeping
//! concurrent runs isolated. Writes are last-write-wins.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Shared key/value store passed to every step action in a run.
#[derive(Debug, Default)]
pub struct ScriptParams {
    values: DashMap<String, Value>,
}

impl ScriptParams {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a store pre-populated from `key=value` style pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let params = Self::default();
        for (key, value) in pairs {
            params.values.insert(key.into(), value.into());
        }
        Arc::new(params)
    }

    /// Set a value, replacing any previous one (last write wins).
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    /// Remove a key, returning the value it held.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

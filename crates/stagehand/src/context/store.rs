//! Typed key/value store executors publish results into.

use crate::error::ContextError;
use crate::value::{Value, ValueType};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Key to [`Value`] store guarded by its own lock.
///
/// Reads return owned clones, so callers never hold the lock across an await.
#[derive(Debug, Default)]
pub struct DataStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

fn mismatch(key: &str, expected: ValueType, value: &Value) -> ContextError {
    ContextError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        actual: value.value_type().to_string(),
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning the previous value.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.write().await.insert(key.into(), value.into())
    }

    pub async fn get(&self, key: &str) -> Result<Value, ContextError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ContextError::NotFound {
                key: key.to_string(),
            })
    }

    /// Stores `value` after checking it carries the declared type tag.
    pub async fn set_typed(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
        expected: ValueType,
    ) -> Result<(), ContextError> {
        let key = key.into();
        let value = value.into();
        if value.value_type() != expected {
            return Err(mismatch(&key, expected, &value));
        }
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    /// Reads a value whose type tag must equal `expected`.
    pub async fn get_typed(&self, key: &str, expected: ValueType) -> Result<Value, ContextError> {
        let value = self.get(key).await?;
        if value.value_type() != expected {
            return Err(mismatch(key, expected, &value));
        }
        Ok(value)
    }

    pub async fn get_string(&self, key: &str) -> Result<String, ContextError> {
        match self.get_typed(key, ValueType::String).await? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(key, ValueType::String, &other)),
        }
    }

    pub async fn get_int(&self, key: &str) -> Result<i64, ContextError> {
        let value = self.get(key).await?;
        value
            .as_i64()
            .ok_or_else(|| mismatch(key, ValueType::Int, &value))
    }

    /// Reads a float. Integers are widened.
    pub async fn get_float(&self, key: &str) -> Result<f64, ContextError> {
        let value = self.get(key).await?;
        value
            .as_f64()
            .ok_or_else(|| mismatch(key, ValueType::Float, &value))
    }

    pub async fn get_bool(&self, key: &str) -> Result<bool, ContextError> {
        let value = self.get(key).await?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(key, ValueType::Bool, &value))
    }

    pub async fn get_list(&self, key: &str) -> Result<Vec<Value>, ContextError> {
        match self.get_typed(key, ValueType::List).await? {
            Value::List(items) => Ok(items),
            other => Err(mismatch(key, ValueType::List, &other)),
        }
    }

    pub async fn get_map(&self, key: &str) -> Result<BTreeMap<String, Value>, ContextError> {
        match self.get_typed(key, ValueType::Map).await? {
            Value::Map(entries) => Ok(entries),
            other => Err(mismatch(key, ValueType::Map, &other)),
        }
    }

    /// Reads a nested value, e.g. `login` + `body.token`.
    pub async fn lookup(&self, key: &str, path: &str) -> Result<Value, ContextError> {
        let entries = self.entries.read().await;
        let root = entries.get(key).ok_or_else(|| ContextError::NotFound {
            key: key.to_string(),
        })?;
        root.lookup(path)
            .cloned()
            .ok_or_else(|| ContextError::NotFound {
                key: format!("{key}.{path}"),
            })
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().await.remove(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Deep snapshot of every entry. Mutating it never touches the store.
    pub async fn all(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.clone()
    }
}

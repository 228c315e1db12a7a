use std::{collections::HashMap, sync::Mutex};

use serde_json::Value;

use crate::prelude::*;

/// Key-value persistence the location manager writes through. The app provides one store
/// that lives for the session (last known location) and one that survives restarts
/// (permission history).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result;
    fn remove(&self, key: &str);
}

/// A store that only lives as long as the process
#[derive(Default)]
pub struct MemoryStore(Mutex<HashMap<String, Value>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result {
        let mut map = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.0.lock() {
            map.remove(key);
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Option<Value> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get("a").is_none());
        store.set("a", json!({ "x": 1 })).expect("Failed to set");
        assert_eq!(store.get("a"), Some(json!({ "x": 1 })));
        store.remove("a");
        assert!(store.is_empty());
    }
}

use anyhow::{Context, Result};
use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Durable key/value storage that survives process restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read `key` and decode it. Values that fail to decode are treated as absent.
pub fn get_typed<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!("Ignoring undecodable value for key {key}: {err}");
            None
        }
    }
}

pub fn set_typed<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let encoded =
        serde_json::to_value(value).with_context(|| format!("failed to encode value for {key}"))?;
    store.set(key, encoded)
}

/// Key/value store backed by a single pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("State file {} is corrupt, starting empty: {err}", path.display());
                Map::new()
            })
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write state to {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.write();
        guard.insert(key.to_string(), value);
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.write();
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }
}

/// Non-durable store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        match self.data.read() {
            Ok(guard) => guard.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("loopwatch-kv-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let path = scratch_path("state.json");
        {
            let store = JsonFileStore::new(path.clone()).unwrap();
            store.set("a", json!(42)).unwrap();
            store.set("b", json!("text")).unwrap();
            store.remove("b").unwrap();
        }

        let reopened = JsonFileStore::new(path.clone()).unwrap();
        assert_eq!(reopened.get("a"), Some(json!(42)));
        assert_eq!(reopened.get("b"), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = scratch_path("state.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(path.clone()).unwrap();
        assert_eq!(store.get("anything"), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn typed_helpers_ignore_mismatched_values() {
        let store = MemoryStore::new();
        set_typed(&store, "offset", &1500_i64).unwrap();
        store.set("broken", json!("not a number")).unwrap();

        assert_eq!(get_typed::<i64>(&store, "offset"), Some(1500));
        assert_eq!(get_typed::<i64>(&store, "broken"), None);
        assert_eq!(get_typed::<i64>(&store, "missing"), None);
    }
}

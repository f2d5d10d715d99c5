use super::{Isolation, StorageBackend, WriteBatch};
use crate::error::{Result, VaultError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Non-isolated in-process map. Development and test builds only.
#[derive(Debug)]
pub struct MemoryBackend {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    /// Creates an empty store. The name is a reminder that anything in the
    /// process can read it.
    #[must_use]
    pub fn new_insecure() -> Self {
        warn!("using non-isolated in-memory vault storage");
        Self {
            map: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.map
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("memory store poisoned".into()))
    }
}

impl StorageBackend for MemoryBackend {
    fn isolation(&self) -> Isolation {
        Isolation::Shared
    }

    fn probe(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let map = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| map.get(*k).map(|v| ((*k).to_string(), v.clone())))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut map = self.lock()?;
        for key in &batch.removes {
            map.remove(key);
        }
        map.extend(batch.puts);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

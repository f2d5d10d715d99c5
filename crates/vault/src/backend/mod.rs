//! Key/value storage the vault persists into.
//!
//! The isolated backend lives in the process's private data directory and is
//! what production builds use. The memory backend is non-isolated and only
//! compiled into debug builds; it has to be picked explicitly by the
//! embedding application.

#[cfg(debug_assertions)]
mod memory;
mod sqlite;

#[cfg(debug_assertions)]
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use std::collections::HashMap;
use std::fmt::Debug;

/// Whether a backend is reachable only from the vault's own runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Isolated,
    Shared,
}

/// A set of writes and removals applied as one unit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    pub puts: Vec<(String, String)>,
    pub removes: Vec<String>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.puts.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.removes.push(key.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }
}

/// Storage surface mirroring an extension storage area:
/// `get(keys)`, `set(items)`, `remove(keys)` and `clear()`.
pub trait StorageBackend: Send + Sync + Debug {
    fn isolation(&self) -> Isolation;

    /// Fails when the storage area can't be reached from this process.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] when unreachable.
    fn probe(&self) -> Result<()>;

    /// Returns the values present for `keys`; absent keys are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Applies every put and removal in `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure;
    /// nothing from the batch is applied in that case.
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn clear(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn get_one(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(&[key])?.remove(key))
    }

    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn set(&self, items: Vec<(String, String)>) -> Result<()> {
        self.apply(WriteBatch {
            puts: items,
            removes: Vec::new(),
        })
    }

    /// # Errors
    ///
    /// Returns [`crate::VaultError::StorageUnavailable`] on backend failure.
    fn remove(&self, keys: &[&str]) -> Result<()> {
        self.apply(WriteBatch {
            puts: Vec::new(),
            removes: keys.iter().map(|k| (*k).to_string()).collect(),
        })
    }
}

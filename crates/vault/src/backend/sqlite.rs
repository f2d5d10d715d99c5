use super::{Isolation, StorageBackend, WriteBatch};
use crate::error::{Result, VaultError};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Isolated storage area backed by a `SQLite` file in a private directory.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteBackend {
    /// Opens (creating if needed) the store at `path` and applies the schema.
    ///
    /// On Unix the parent directory is restricted to the owner (0700) and the
    /// database file to 0600.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the directory or the
    /// database can't be created, opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
            restrict_permissions(parent, 0o700)?;
        }
        let conn = Connection::open(path)?;
        restrict_permissions(path, 0o600)?;
        let backend = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        backend.migrate()?;
        debug!(path = %path.display(), "opened isolated storage");
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );
        ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("storage connection poisoned".into()))
    }
}

impl StorageBackend for SqliteBackend {
    fn isolation(&self) -> Isolation {
        Isolation::Isolated
    }

    fn probe(&self) -> Result<()> {
        let one: i64 = self.lock()?.query_row("SELECT 1", [], |r| r.get(0))?;
        if one == 1 {
            Ok(())
        } else {
            Err(VaultError::StorageUnavailable("probe returned unexpected value".into()))
        }
    }

    fn get(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?")?;
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = stmt.query_row(params![key], |r| r.get(0)).optional()?;
            if let Some(value) = value {
                out.insert((*key).to_string(), value);
            }
        }
        Ok(out)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for key in &batch.removes {
            tx.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        }
        for (key, value) in &batch.puts {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?1) = ?2 ORDER BY key ASC")?;
        let len = i64::try_from(prefix.len()).map_err(|e| VaultError::InvalidInput(e.to_string()))?;
        let rows = stmt.query_map(params![len, prefix], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

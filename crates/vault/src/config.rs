use crate::autolock::AutoLockConfig;
use crate::crypto::{KdfParams, MIN_PBKDF2_ITERATIONS};
use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level vault configuration, read from `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub kdf: KdfConfig,
    pub autolock: AutoLockConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Isolated `SQLite` store in the per-user data directory.
    #[default]
    Sqlite,
    /// Non-isolated process memory. Debug builds only.
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Database file; defaults to [`default_db_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_db_path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    #[default]
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256,
    #[serde(rename = "argon2id")]
    Argon2id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub algorithm: KdfAlgorithm,

    /// PBKDF2 rounds
    pub iterations: u32,

    /// Argon2id memory cost in KiB
    pub m_cost_kib: u32,

    /// Argon2id passes
    pub t_cost: u32,

    /// Argon2id lanes
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2Sha256,
            iterations: MIN_PBKDF2_ITERATIONS,
            m_cost_kib: 19456,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfConfig {
    #[must_use]
    pub const fn params(&self) -> KdfParams {
        match self.algorithm {
            KdfAlgorithm::Pbkdf2Sha256 => KdfParams::Pbkdf2Sha256 {
                iterations: self.iterations,
            },
            KdfAlgorithm::Argon2id => KdfParams::Argon2id {
                m_cost_kib: self.m_cost_kib,
                t_cost: self.t_cost,
                p_cost: self.p_cost,
            },
        }
    }
}

impl VaultConfig {
    /// Reads the configuration at `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if the file can't be read, doesn't
    /// parse, or fails [`VaultConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw)
                .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(VaultError::Config(format!("{}: {e}", path.display()))),
        };
        config.validate()?;
        Ok(config)
    }

    /// [`VaultConfig::load`] from [`default_config_path`].
    ///
    /// # Errors
    ///
    /// See [`VaultConfig::load`].
    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path())
    }

    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if the file can't be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VaultError::Config(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`VaultError::Config`] for KDF costs below the accepted
    /// minimum or a memory backend requested by a release build.
    pub fn validate(&self) -> Result<()> {
        self.kdf
            .params()
            .validate()
            .map_err(|e| VaultError::Config(e.to_string()))?;
        if self.storage.kind == StorageKind::Memory && !cfg!(debug_assertions) {
            return Err(VaultError::Config(
                "the in-memory storage backend is only available in development builds".into(),
            ));
        }
        Ok(())
    }
}

#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyward")
        .join("config.json")
}

#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keyward")
        .join("vault.sqlite3")
}

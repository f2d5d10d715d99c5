#![allow(dead_code)]
use keyward_vault::{
    ContextGuard, CryptoEngine, KdfParams, KeyVaultService, SqliteBackend, StorageBackend, VaultError, VaultStore,
    WriteBatch,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

pub const PASSWORD: &str = "Secr3tPass!";
pub const HARDHAT_PHRASE: &str = "test test test test test test test test test test test junk";
pub const HARDHAT_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEAD_ACCOUNT: &str = "0x000000000000000000000000000000000000dEaD";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub backend: Arc<dyn StorageBackend>,
    pub service: KeyVaultService,
}

impl TestContext {
    pub fn new() -> color_eyre::Result<Self> {
        // Isolated temporary directory so nothing touches the real data dir
        let temp_dir = tempfile::tempdir()?;
        let backend: Arc<dyn StorageBackend> =
            Arc::new(SqliteBackend::open(&temp_dir.path().join("vault").join("vault.sqlite3"))?);
        let service = service_over(Arc::clone(&backend), ContextGuard::new(Arc::clone(&backend)));
        Ok(Self {
            temp_dir,
            backend,
            service,
        })
    }

    /// Direct view of the persisted records, bypassing the service.
    pub fn store(&self) -> VaultStore {
        VaultStore::new(Arc::clone(&self.backend))
    }
}

pub fn service_over(backend: Arc<dyn StorageBackend>, guard: ContextGuard) -> KeyVaultService {
    KeyVaultService::new(
        Arc::new(VaultStore::new(backend)),
        guard,
        Arc::new(CryptoEngine::new(KdfParams::default()).unwrap_or_else(|e| panic!("kdf: {e}"))),
    )
}

/// A storage area that can't be reached from this process.
#[derive(Debug)]
pub struct UnreachableBackend;

fn unreachable() -> VaultError {
    VaultError::StorageUnavailable("storage area not reachable from this context".into())
}

impl StorageBackend for UnreachableBackend {
    fn isolation(&self) -> keyward_vault::Isolation {
        keyward_vault::Isolation::Isolated
    }
    fn probe(&self) -> keyward_vault::Result<()> {
        Err(unreachable())
    }
    fn get(&self, _keys: &[&str]) -> keyward_vault::Result<HashMap<String, String>> {
        Err(unreachable())
    }
    fn apply(&self, _batch: WriteBatch) -> keyward_vault::Result<()> {
        Err(unreachable())
    }
    fn keys_with_prefix(&self, _prefix: &str) -> keyward_vault::Result<Vec<String>> {
        Err(unreachable())
    }
    fn clear(&self) -> keyward_vault::Result<()> {
        Err(unreachable())
    }
}

//! Self-custodial key vault: generates, seals, stores and signs with
//! secp256k1 keys and their recovery phrases, entirely on this device.

pub mod autolock;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod mnemonic;
pub mod record;
pub mod response;
pub mod service;
pub mod session;
pub mod store;

pub use crate::autolock::{AutoLock, AutoLockConfig};
#[cfg(debug_assertions)]
pub use crate::backend::MemoryBackend;
pub use crate::backend::{Isolation, SqliteBackend, StorageBackend, WriteBatch};
pub use crate::config::{KdfAlgorithm, KdfConfig, StorageConfig, StorageKind, VaultConfig};
pub use crate::crypto::{CryptoEngine, CryptoStats, KdfParams, Sealed, SymmetricKey};
pub use crate::error::{ErrorKind, Result, VaultError};
pub use crate::guard::ContextGuard;
pub use crate::mnemonic::{DerivedAccount, PrivateKey, Signature};
pub use crate::record::{RecordSummary, SecretField, SecretRecord};
pub use crate::response::{ErrorBody, VaultResponse};
pub use crate::service::{
    GeneratedWallet, KeyVaultService, RestoredWallet, TransactionRequest, TransactionSigner, WalletStatus,
};
pub use crate::session::{SessionLockState, SessionState};
pub use crate::store::{ConsistencyReport, VaultStore};

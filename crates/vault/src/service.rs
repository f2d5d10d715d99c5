//! The vault façade. Every call is checked by the [`ContextGuard`] before it
//! touches crypto or storage; password work runs on the blocking pool.

use crate::autolock::{AutoLock, AutoLockConfig};
#[cfg(debug_assertions)]
use crate::backend::MemoryBackend;
use crate::backend::{SqliteBackend, StorageBackend};
use crate::config::{StorageKind, VaultConfig};
use crate::crypto::{CryptoEngine, CryptoStats, KdfParams};
use crate::error::{Result, VaultError};
use crate::guard::ContextGuard;
use crate::mnemonic::{self, DerivedAccount, PrivateKey, Signature};
use crate::record::{RecordSummary, SecretField, SecretRecord};
use crate::session::{SessionLockState, SessionState};
use crate::store::{ConsistencyReport, VaultStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Result of [`KeyVaultService::generate`]. The phrase is shown to the
/// holder once and never stored in plaintext.
#[derive(Clone, Serialize)]
pub struct GeneratedWallet {
    pub id: String,
    pub address: String,
    pub mnemonic: Zeroizing<String>,
}

impl fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredWallet {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WalletStatus {
    NoWallet,
    Locked,
    Unlocked { id: String, address: String },
}

/// Call a smart-account layer asks the vault to authorize. The vault only
/// lends the key to a [`TransactionSigner`]; it never submits anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to: String,
    /// Amount in wei, decimal.
    pub value: String,
    /// Calldata, `0x`-prefixed hex.
    pub data: String,
}

impl TransactionRequest {
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidInput`] for a malformed field.
    pub fn validate(&self) -> Result<()> {
        if !mnemonic::is_valid_address(&self.to) {
            return Err(VaultError::InvalidInput(format!("bad recipient {}", self.to)));
        }
        if self.value.is_empty() || !self.value.chars().all(|c| c.is_ascii_digit()) {
            return Err(VaultError::InvalidInput("value must be a decimal amount".into()));
        }
        let data = self.data.strip_prefix("0x").unwrap_or(&self.data);
        hex::decode(data).map_err(|e| VaultError::InvalidInput(format!("data: {e}")))?;
        Ok(())
    }
}

/// Signs transactions with a borrowed key. Implemented by the account layer.
pub trait TransactionSigner {
    type Output;

    /// # Errors
    ///
    /// Implementation defined.
    fn sign(&self, key: &PrivateKey, tx: &TransactionRequest) -> Result<Self::Output>;
}

pub struct KeyVaultService {
    store: Arc<VaultStore>,
    guard: ContextGuard,
    engine: Arc<CryptoEngine>,
    session: SessionLockState,
    autolock_config: Option<AutoLockConfig>,
    autolock: Mutex<Option<AutoLock>>,
}

impl fmt::Debug for KeyVaultService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultService")
            .field("guard", &self.guard)
            .field("kdf", self.engine.kdf_params())
            .finish_non_exhaustive()
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Authentication failures leave the service as one kind, whatever the cause.
fn auth_failure(err: VaultError) -> VaultError {
    match err {
        VaultError::Decryption | VaultError::Kdf(_) | VaultError::InvalidPassword => {
            warn!("vault authentication failed");
            VaultError::InvalidPassword
        }
        other => other,
    }
}

fn require_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::InvalidInput("password must not be empty".into()));
    }
    Ok(())
}

fn seal_account(
    engine: &CryptoEngine,
    id: String,
    account: &DerivedAccount,
    password: &str,
    created_at: OffsetDateTime,
) -> Result<SecretRecord> {
    let secret = engine.seal(
        password,
        account.private_key.as_bytes(),
        &SecretRecord::ad_for(&id, SecretField::PrivateKey),
    )?;
    let phrase = engine.seal(
        password,
        account.phrase.as_bytes(),
        &SecretRecord::ad_for(&id, SecretField::Mnemonic),
    )?;
    Ok(SecretRecord::from_sealed(
        id,
        account.address.clone(),
        engine.kdf_params().clone(),
        &secret,
        Some(&phrase),
        created_at,
    ))
}

fn open_private_key(engine: &CryptoEngine, record: &SecretRecord, password: &str) -> Result<PrivateKey> {
    let plain = engine.open(
        password,
        &record.sealed_secret()?,
        &record.kdf,
        &record.ad(SecretField::PrivateKey),
    )?;
    // Authenticated bytes that aren't this record's key mean the record is damaged.
    let key = PrivateKey::from_slice(&plain).map_err(|_| VaultError::Decryption)?;
    if !key.address()?.eq_ignore_ascii_case(&record.address) {
        return Err(VaultError::Decryption);
    }
    Ok(key)
}

impl KeyVaultService {
    pub fn new(store: Arc<VaultStore>, guard: ContextGuard, engine: Arc<CryptoEngine>) -> Self {
        Self {
            store,
            guard,
            engine,
            session: SessionLockState::new(),
            autolock_config: None,
            autolock: Mutex::new(None),
        }
    }

    /// Builds backend, store, guard and crypto engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] for invalid settings and
    /// [`VaultError::StorageUnavailable`] if the store can't be opened.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        config.validate()?;
        let (backend, guard): (Arc<dyn StorageBackend>, ContextGuard) = match config.storage.kind {
            StorageKind::Sqlite => {
                let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::open(&config.storage.resolved_path())?);
                (Arc::clone(&backend), ContextGuard::new(backend))
            }
            #[cfg(debug_assertions)]
            StorageKind::Memory => {
                let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new_insecure());
                (Arc::clone(&backend), ContextGuard::allow_development_backend(backend))
            }
            #[cfg(not(debug_assertions))]
            StorageKind::Memory => {
                return Err(VaultError::Config(
                    "the in-memory storage backend is only available in development builds".into(),
                ));
            }
        };
        let engine = CryptoEngine::new(config.kdf.params()).map_err(|e| VaultError::Config(e.to_string()))?;
        let service = Self::new(Arc::new(VaultStore::new(backend)), guard, Arc::new(engine));
        Ok(service.with_autolock(config.autolock.clone()))
    }

    /// Locks the session after `config.inactivity_timeout_minutes` without a
    /// vault call. Takes effect once [`Self::start_autolock`] runs.
    #[must_use]
    pub fn with_autolock(mut self, config: AutoLockConfig) -> Self {
        self.autolock_config = config.enabled.then_some(config);
        self
    }

    /// Spawns the auto-lock task unless it is disabled or already running.
    /// Needs a running tokio runtime. Returns whether a task is running.
    pub async fn start_autolock(&self) -> bool {
        let Some(config) = &self.autolock_config else {
            return false;
        };
        let mut running = self.autolock.lock().await;
        if running.is_none() {
            *running = Some(AutoLock::spawn(self.session.clone(), config));
        }
        true
    }

    pub async fn stop_autolock(&self) {
        if let Some(autolock) = self.autolock.lock().await.take() {
            autolock.stop().await;
        }
    }

    #[must_use]
    pub fn crypto_stats(&self) -> CryptoStats {
        self.engine.stats()
    }

    #[must_use]
    pub fn kdf_params(&self) -> &KdfParams {
        self.engine.kdf_params()
    }

    #[must_use]
    pub const fn session(&self) -> &SessionLockState {
        &self.session
    }

    async fn touch(&self) {
        self.session.touch().await;
    }

    /// Runs `f` against the store on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&VaultStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        blocking(move || f(&store)).await
    }

    async fn resolve(&self, address_or_id: &str) -> Result<SecretRecord> {
        let target = address_or_id.to_string();
        self.with_store(move |store| {
            if mnemonic::is_valid_address(&target) {
                store.get_by_address(&target)
            } else {
                store.get_by_id(&target)
            }
        })
        .await
    }

    /// Creates a new key pair with a fresh recovery phrase.
    ///
    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`], [`VaultError::InvalidInput`] for an
    /// empty password, or storage and entropy failures.
    pub async fn generate(&self, password: &str) -> Result<GeneratedWallet> {
        self.guard.check()?;
        require_password(password)?;

        let engine = Arc::clone(&self.engine);
        let password = Zeroizing::new(password.to_string());
        let (record, phrase) = blocking(move || {
            let account = mnemonic::generate_mnemonic()?;
            let id = Uuid::new_v4().to_string();
            let record = seal_account(&engine, id, &account, &password, OffsetDateTime::now_utc())?;
            Ok((record, account.phrase))
        })
        .await?;

        let record = self.with_store(move |store| store.put(&record).map(|()| record)).await?;
        info!(id = %record.id, address = %record.address, "generated wallet");
        self.session.unlock(&record.id, &record.address).await;
        self.touch().await;

        Ok(GeneratedWallet {
            id: record.id,
            address: record.address,
            mnemonic: phrase,
        })
    }

    /// Imports a recovery phrase. A phrase whose address is already stored
    /// re-seals that record under `password`.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidMnemonic`] for a bad phrase, whatever the
    /// password. [`VaultError::InvalidInput`] when the phrase's address is
    /// linked as another wallet's account.
    pub async fn restore(&self, phrase: &str, password: &str) -> Result<RestoredWallet> {
        self.guard.check()?;

        let owned = Zeroizing::new(phrase.to_string());
        let account = blocking(move || mnemonic::derive_from_mnemonic(&owned)).await?;
        require_password(password)?;

        let address = account.address.clone();
        let existing = match self.with_store(move |store| store.get_by_address(&address)).await {
            // Matched through another record's account address.
            Ok(record) if !record.address.eq_ignore_ascii_case(&account.address) => {
                return Err(VaultError::InvalidInput(format!(
                    "{} is linked as the account of another wallet",
                    account.address
                )));
            }
            Ok(record) => Some(record),
            Err(VaultError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let (id, created_at, account_address) = match &existing {
            Some(r) => (r.id.clone(), r.created_at, r.account_address.clone()),
            None => (Uuid::new_v4().to_string(), OffsetDateTime::now_utc(), None),
        };

        let engine = Arc::clone(&self.engine);
        let password = Zeroizing::new(password.to_string());
        let mut record = blocking(move || seal_account(&engine, id, &account, &password, created_at)).await?;
        record.account_address = account_address;

        let record = self.with_store(move |store| store.put(&record).map(|()| record)).await?;
        if existing.is_some() {
            info!(id = %record.id, address = %record.address, "re-sealed wallet from recovery phrase");
        } else {
            info!(id = %record.id, address = %record.address, "restored wallet");
        }
        self.session.unlock(&record.id, &record.address).await;
        self.touch().await;

        Ok(RestoredWallet {
            id: record.id,
            address: record.address,
        })
    }

    /// Decrypts the private key of the record matching `address_or_id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] when nothing matches and
    /// [`VaultError::InvalidPassword`] when the key doesn't open.
    pub async fn unlock(&self, address_or_id: &str, password: &str) -> Result<PrivateKey> {
        self.guard.check()?;
        let record = self.resolve(address_or_id).await?;
        let (id, address) = (record.id.clone(), record.address.clone());

        let key = self.decrypt_key(record, password).await?;
        self.session.unlock(&id, &address).await;
        self.touch().await;
        Ok(key)
    }

    /// Decrypts the recovery phrase. Runs the KDF on every call.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the record has no phrase and
    /// [`VaultError::InvalidPassword`] when it doesn't open.
    pub async fn export(&self, id: &str, password: &str) -> Result<Zeroizing<String>> {
        self.guard.check()?;
        let record = self.resolve(id).await?;
        let sealed = record
            .sealed_mnemonic()
            .map_err(auth_failure)?
            .ok_or_else(|| VaultError::NotFound(format!("recovery phrase for {}", record.id)))?;

        let engine = Arc::clone(&self.engine);
        let password = Zeroizing::new(password.to_string());
        let phrase = blocking(move || {
            let plain = engine.open(&password, &sealed, &record.kdf, &record.ad(SecretField::Mnemonic))?;
            let phrase = std::str::from_utf8(&plain).map_err(|_| VaultError::Decryption)?;
            Ok(Zeroizing::new(phrase.to_string()))
        })
        .await
        .map_err(auth_failure)?;

        info!(%id, "exported recovery phrase");
        self.touch().await;
        Ok(phrase)
    }

    /// Signs `message` as a personal message with the record's key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unlock`].
    pub async fn sign(&self, id: &str, password: &str, message: &[u8]) -> Result<Signature> {
        self.with_private_key(id, password, |key| mnemonic::sign_message(key, message))
            .await
    }

    /// Lends the decrypted key to `f`. The key is zeroized when `f` returns.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unlock`], plus whatever `f` returns.
    pub async fn with_private_key<T, F>(&self, id: &str, password: &str, f: F) -> Result<T>
    where
        F: FnOnce(&PrivateKey) -> Result<T>,
    {
        self.guard.check()?;
        let record = self.resolve(id).await?;
        let key = self.decrypt_key(record, password).await?;
        self.touch().await;
        f(&key)
    }

    /// # Errors
    ///
    /// [`VaultError::InvalidInput`] for a malformed request, otherwise as
    /// [`Self::with_private_key`].
    pub async fn sign_transaction<S: TransactionSigner>(
        &self,
        id: &str,
        password: &str,
        tx: &TransactionRequest,
        signer: &S,
    ) -> Result<S::Output> {
        self.guard.check()?;
        tx.validate()?;
        self.with_private_key(id, password, |key| signer.sign(key, tx)).await
    }

    /// Records a deployed smart-account address as a secondary lookup for `id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown id and
    /// [`VaultError::InvalidInput`] for a malformed address, one linked to
    /// another wallet, or the wallet's own address.
    pub async fn link_account(&self, id: &str, account_address: &str) -> Result<RecordSummary> {
        self.guard.check()?;
        if !mnemonic::is_valid_address(account_address) {
            return Err(VaultError::InvalidInput(format!("bad account address {account_address}")));
        }
        let raw = hex::decode(&account_address[2..]).map_err(|e| VaultError::InvalidInput(e.to_string()))?;
        let checksummed = mnemonic::to_checksum_address(&raw);

        let id = id.to_string();
        let record = self
            .with_store(move |store| {
                match store.get_by_address(&checksummed) {
                    Ok(owner) if owner.id != id => {
                        return Err(VaultError::InvalidInput(format!(
                            "{checksummed} already belongs to another wallet"
                        )));
                    }
                    Ok(_) | Err(VaultError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                store.add_address_alias(&checksummed, &id)
            })
            .await?;
        self.touch().await;
        Ok(record.summary())
    }

    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`] or storage failures.
    pub async fn list(&self) -> Result<Vec<RecordSummary>> {
        self.guard.check()?;
        self.with_store(VaultStore::list_all).await
    }

    /// Deletes the record. Locks the session if it was the unlocked one.
    ///
    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`] or storage failures.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.guard.check()?;
        let owned = id.to_string();
        self.with_store(move |store| store.delete_by_id(&owned)).await?;
        self.session.lock_if_active(id).await;
        Ok(())
    }

    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`].
    pub async fn lock(&self) -> Result<()> {
        self.guard.check()?;
        self.session.lock().await;
        Ok(())
    }

    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`] or storage failures.
    pub async fn status(&self) -> Result<WalletStatus> {
        self.guard.check()?;
        if self.with_store(VaultStore::count).await? == 0 {
            return Ok(WalletStatus::NoWallet);
        }
        Ok(match self.session.current().await {
            SessionState::Locked => WalletStatus::Locked,
            SessionState::Unlocked { id, address } => WalletStatus::Unlocked { id, address },
        })
    }

    /// # Errors
    ///
    /// [`VaultError::UntrustedContext`] or storage failures.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.guard.check()?;
        let report = self.with_store(VaultStore::check_consistency).await?;
        debug!(?report, "consistency check");
        Ok(report)
    }

    async fn decrypt_key(&self, record: SecretRecord, password: &str) -> Result<PrivateKey> {
        let engine = Arc::clone(&self.engine);
        let password = Zeroizing::new(password.to_string());
        blocking(move || open_private_key(&engine, &record, &password))
            .await
            .map_err(auth_failure)
    }
}

use crate::error::{Result, VaultError};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::{Zeroize, Zeroizing};

/// Lowest PBKDF2 iteration count accepted for password derivation.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;
/// Shortest salt accepted by [`derive_key`].
pub const MIN_SALT_LEN: usize = 16;
/// Length of the salts generated for new records.
pub const SALT_LEN: usize = 16;
/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key derived from a password. Zeroized on drop and
/// never printed.
#[derive(Clone)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a key from the system entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Entropy`] if the OS random source fails.
    pub fn random() -> Result<Self> {
        let mut k = [0u8; KEY_LEN];
        getrandom::fill(&mut k).map_err(|e| VaultError::Entropy(e.to_string()))?;
        Ok(Self(k))
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Password key-derivation algorithm and its cost parameters.
///
/// Stored next to every sealed record so records keep opening after the
/// configured defaults change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum KdfParams {
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256 { iterations: u32 },
    #[serde(rename = "argon2id")]
    Argon2id { m_cost_kib: u32, t_cost: u32, p_cost: u32 },
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::Pbkdf2Sha256 {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Argon2id costs used when the memory-hard KDF is selected (~19MB).
    #[must_use]
    pub const fn argon2id_default() -> Self {
        Self::Argon2id {
            m_cost_kib: 19456,
            t_cost: 3,
            p_cost: 1,
        }
    }

    /// Checks the cost parameters without running the KDF.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Kdf`] when PBKDF2 iterations are below
    /// [`MIN_PBKDF2_ITERATIONS`] or Argon2 rejects the costs.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Pbkdf2Sha256 { iterations } if iterations < MIN_PBKDF2_ITERATIONS => Err(VaultError::Kdf(format!(
                "pbkdf2 iterations must be at least {MIN_PBKDF2_ITERATIONS}, got {iterations}"
            ))),
            Self::Pbkdf2Sha256 { .. } => Ok(()),
            Self::Argon2id {
                m_cost_kib,
                t_cost,
                p_cost,
            } => Params::new(m_cost_kib, t_cost, p_cost, Some(KEY_LEN))
                .map(|_| ())
                .map_err(|e| VaultError::Kdf(e.to_string())),
        }
    }
}

/// Derives a symmetric key from `password` and `salt`.
///
/// The output is deterministic for identical inputs.
///
/// # Errors
///
/// Returns [`VaultError::Kdf`] if the password is empty, the salt is shorter
/// than [`MIN_SALT_LEN`], or the parameters are rejected.
pub fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<SymmetricKey> {
    if password.is_empty() {
        return Err(VaultError::Kdf("password must not be empty".into()));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(VaultError::Kdf(format!(
            "salt must be at least {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    params.validate()?;

    let mut out = [0u8; KEY_LEN];
    match *params {
        KdfParams::Pbkdf2Sha256 { iterations } => {
            pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut out)
                .map_err(|e| VaultError::Kdf(e.to_string()))?;
        }
        KdfParams::Argon2id {
            m_cost_kib,
            t_cost,
            p_cost,
        } => {
            let argon2 = Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                Params::new(m_cost_kib, t_cost, p_cost, Some(KEY_LEN)).map_err(|e| VaultError::Kdf(e.to_string()))?,
            );
            argon2
                .hash_password_into(password.as_bytes(), salt, &mut out)
                .map_err(|e| VaultError::Kdf(e.to_string()))?;
        }
    }
    Ok(SymmetricKey(out))
}

/// Encrypts `plaintext` with XChaCha20-Poly1305 under a fresh random nonce.
///
/// `ad` is authenticated but not encrypted and must be supplied unchanged to
/// [`decrypt`]. Returns `(ciphertext, iv)`.
///
/// # Errors
///
/// Returns an error if the entropy source fails or the cipher rejects the
/// input.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], ad: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let aead = XChaCha20Poly1305::new((&key.0).into());
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce).map_err(|e| VaultError::Entropy(e.to_string()))?;
    let ct = aead
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: ad })
        .map_err(|_| VaultError::Encryption)?;
    Ok((ct, nonce.to_vec()))
}

/// Decrypts a ciphertext produced by [`encrypt`].
///
/// A wrong key, wrong nonce, different associated data and a tampered
/// ciphertext all produce the same [`VaultError::Decryption`].
///
/// # Errors
///
/// Returns [`VaultError::Decryption`] when authentication fails.
pub fn decrypt(key: &SymmetricKey, iv: &[u8], ciphertext: &[u8], ad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if iv.len() != NONCE_LEN {
        return Err(VaultError::Decryption);
    }
    let aead = XChaCha20Poly1305::new((&key.0).into());
    let pt = aead
        .decrypt(XNonce::from_slice(iv), Payload { msg: ciphertext, aad: ad })
        .map_err(|_| VaultError::Decryption)?;
    Ok(Zeroizing::new(pt))
}

/// Returns `len` bytes from the system entropy source.
///
/// # Errors
///
/// Returns [`VaultError::Entropy`] if the OS random source fails.
pub fn random_salt(len: usize) -> Result<Vec<u8>> {
    let mut salt = vec![0u8; len];
    getrandom::fill(&mut salt).map_err(|e| VaultError::Entropy(e.to_string()))?;
    Ok(salt)
}

/// SHA-256 content hash. Not for passwords.
#[must_use]
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Output of one password seal: everything needed to reopen the plaintext
/// except the password itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Default)]
struct Counters {
    kdf: AtomicU64,
    encrypt: AtomicU64,
    decrypt: AtomicU64,
}

/// Snapshot of how much cryptographic work a [`CryptoEngine`] performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CryptoStats {
    pub kdf_calls: u64,
    pub encrypt_calls: u64,
    pub decrypt_calls: u64,
}

impl CryptoStats {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.kdf_calls + self.encrypt_calls + self.decrypt_calls
    }
}

/// Password sealing with the configured KDF. Counts every KDF and AEAD call.
#[derive(Debug)]
pub struct CryptoEngine {
    kdf: KdfParams,
    counters: Counters,
}

impl CryptoEngine {
    /// # Errors
    ///
    /// Returns [`VaultError::Kdf`] if `kdf` fails validation.
    pub fn new(kdf: KdfParams) -> Result<Self> {
        kdf.validate()?;
        Ok(Self {
            kdf,
            counters: Counters::default(),
        })
    }

    pub const fn kdf_params(&self) -> &KdfParams {
        &self.kdf
    }

    /// # Errors
    ///
    /// See [`derive_key`].
    pub fn derive_key(&self, password: &str, salt: &[u8], params: &KdfParams) -> Result<SymmetricKey> {
        self.counters.kdf.fetch_add(1, Ordering::Relaxed);
        derive_key(password, salt, params)
    }

    /// Seals `plaintext` under a key derived from `password` with a fresh
    /// salt and a fresh nonce.
    ///
    /// # Errors
    ///
    /// Propagates KDF, entropy and cipher failures.
    pub fn seal(&self, password: &str, plaintext: &[u8], ad: &[u8]) -> Result<Sealed> {
        let salt = random_salt(SALT_LEN)?;
        let key = self.derive_key(password, &salt, &self.kdf)?;
        self.counters.encrypt.fetch_add(1, Ordering::Relaxed);
        let (ciphertext, iv) = encrypt(&key, plaintext, ad)?;
        Ok(Sealed { salt, iv, ciphertext })
    }

    /// Reopens a [`Sealed`] value. A fresh key is derived on every call.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Decryption`] on authentication failure and
    /// [`VaultError::Kdf`] if the stored parameters are unusable.
    pub fn open(&self, password: &str, sealed: &Sealed, params: &KdfParams, ad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.derive_key(password, &sealed.salt, params)?;
        self.counters.decrypt.fetch_add(1, Ordering::Relaxed);
        decrypt(&key, &sealed.iv, &sealed.ciphertext, ad)
    }

    pub fn stats(&self) -> CryptoStats {
        CryptoStats {
            kdf_calls: self.counters.kdf.load(Ordering::Relaxed),
            encrypt_calls: self.counters.encrypt.load(Ordering::Relaxed),
            decrypt_calls: self.counters.decrypt.load(Ordering::Relaxed),
        }
    }
}

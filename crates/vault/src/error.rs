use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = VaultError> = std::result::Result<T, E>;

/// Everything that can go wrong inside the vault.
///
/// Variants carry diagnostic detail for the log. Only the coarse
/// [`ErrorKind`] crosses the service boundary.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("operation attempted outside the trusted vault runtime")]
    UntrustedContext,

    #[error("no wallet record for {0}")]
    NotFound(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid password")]
    InvalidPassword,

    #[error("isolated storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("system entropy source failed: {0}")]
    Entropy(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Key(format!("crypto worker failed: {err}"))
    }
}

impl VaultError {
    /// Collapses the error into the kind reported to callers.
    ///
    /// Decryption and KDF failures both become [`ErrorKind::InvalidPassword`]
    /// so a wrong password can't be told apart from a damaged record.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UntrustedContext => ErrorKind::UntrustedContext,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidMnemonic(_) => ErrorKind::InvalidMnemonic,
            Self::InvalidPassword | Self::Decryption | Self::Kdf(_) => ErrorKind::InvalidPassword,
            Self::StorageUnavailable(_) | Self::Serialization(_) | Self::Config(_) => ErrorKind::StorageUnavailable,
            Self::InvalidInput(_) => ErrorKind::InvalidRequest,
            Self::Encryption | Self::Entropy(_) | Self::Key(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse error categories exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UntrustedContext,
    NotFound,
    InvalidMnemonic,
    InvalidPassword,
    StorageUnavailable,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UntrustedContext => "vault operations are not permitted from this context",
            Self::NotFound => "wallet not found",
            Self::InvalidMnemonic => "invalid recovery phrase",
            Self::InvalidPassword => "invalid password",
            Self::StorageUnavailable => "secure storage is unavailable; run keyward inside its own runtime",
            Self::InvalidRequest => "invalid request",
            Self::Internal => "internal vault error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

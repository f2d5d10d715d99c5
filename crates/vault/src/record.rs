use crate::crypto::{KdfParams, Sealed};
use crate::error::{Result, VaultError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Which ciphertext slot of a record a value belongs to. Part of the AEAD
/// associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretField {
    PrivateKey,
    Mnemonic,
}

impl SecretField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrivateKey => "private-key",
            Self::Mnemonic => "mnemonic",
        }
    }
}

/// One encrypted key entry as persisted in the isolated store.
///
/// Byte blobs are standard base64 so the store only ever sees strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRecord {
    pub id: String,
    pub address: String,
    pub encrypted_secret: String,
    pub iv: String,
    pub salt: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_mnemonic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic_salt: Option<String>,
    #[serde(default)]
    pub kdf: KdfParams,
}

/// Public metadata of a record. Never carries ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SecretRecord {
    /// Builds a record from already sealed material.
    #[must_use]
    pub fn from_sealed(
        id: String,
        address: String,
        kdf: KdfParams,
        secret: &Sealed,
        mnemonic: Option<&Sealed>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            address,
            encrypted_secret: B64.encode(&secret.ciphertext),
            iv: B64.encode(&secret.iv),
            salt: B64.encode(&secret.salt),
            created_at,
            account_address: None,
            encrypted_mnemonic: mnemonic.map(|m| B64.encode(&m.ciphertext)),
            mnemonic_iv: mnemonic.map(|m| B64.encode(&m.iv)),
            mnemonic_salt: mnemonic.map(|m| B64.encode(&m.salt)),
            kdf,
        }
    }

    /// Associated data binding a ciphertext to its record and slot.
    #[must_use]
    pub fn ad_for(id: &str, field: SecretField) -> Vec<u8> {
        let field = field.as_str();
        let mut v = Vec::with_capacity(id.len() + field.len() + 1);
        v.extend_from_slice(id.as_bytes());
        v.push(0x1f);
        v.extend_from_slice(field.as_bytes());
        v
    }

    #[must_use]
    pub fn ad(&self, field: SecretField) -> Vec<u8> {
        Self::ad_for(&self.id, field)
    }

    /// Decodes the private-key ciphertext.
    ///
    /// Undecodable fields are reported as [`VaultError::Decryption`], the same
    /// error a wrong password produces.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Decryption`] if any field is not valid base64.
    pub fn sealed_secret(&self) -> Result<Sealed> {
        Ok(Sealed {
            salt: decode(&self.salt)?,
            iv: decode(&self.iv)?,
            ciphertext: decode(&self.encrypted_secret)?,
        })
    }

    /// Decodes the mnemonic ciphertext, if the record has one. Records written
    /// without a separate mnemonic salt reuse the key salt.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Decryption`] if any field is not valid base64 or
    /// the nonce is missing.
    pub fn sealed_mnemonic(&self) -> Result<Option<Sealed>> {
        let Some(ciphertext) = &self.encrypted_mnemonic else {
            return Ok(None);
        };
        let iv = self.mnemonic_iv.as_deref().ok_or(VaultError::Decryption)?;
        let salt = self.mnemonic_salt.as_deref().unwrap_or(&self.salt);
        Ok(Some(Sealed {
            salt: decode(salt)?,
            iv: decode(iv)?,
            ciphertext: decode(ciphertext)?,
        }))
    }

    #[must_use]
    pub const fn has_mnemonic(&self) -> bool {
        self.encrypted_mnemonic.is_some()
    }

    /// Case-insensitive match against `address` or `account_address`.
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
            || self
                .account_address
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(address))
    }

    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            address: self.address.clone(),
            account_address: self.account_address.clone(),
            created_at: self.created_at,
        }
    }
}

fn decode(value: &str) -> Result<Vec<u8>> {
    B64.decode(value).map_err(|_| VaultError::Decryption)
}

//! BIP-39 recovery phrases, BIP-44 key derivation on secp256k1 and
//! Ethereum-style addresses and message signatures.

use crate::error::{Result, VaultError};
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Recovery phrases are exactly twelve words.
pub const WORD_COUNT: usize = 12;
/// 128 bits of entropy encode to twelve words.
pub const ENTROPY_LEN: usize = 16;
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
pub const PRIVATE_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 65;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Raw secp256k1 private key. Zeroized on drop, never printed.
#[derive(Clone)]
pub struct PrivateKey(Zeroizing<[u8; PRIVATE_KEY_LEN]>);

impl PrivateKey {
    /// # Errors
    ///
    /// Returns [`VaultError::Key`] if `bytes` is not a valid secp256k1 scalar.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let signing = SigningKey::from_slice(bytes).map_err(|e| VaultError::Key(e.to_string()))?;
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        out.copy_from_slice(&signing.to_bytes());
        Ok(Self(out))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(&self.0[..])))
    }

    fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_slice(&self.0[..]).map_err(|e| VaultError::Key(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`VaultError::Key`] if the stored bytes are no longer a valid key.
    pub fn address(&self) -> Result<String> {
        Ok(address_of_verifying_key(self.signing_key()?.verifying_key()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A key pair derived from a recovery phrase.
#[derive(Debug)]
pub struct DerivedAccount {
    pub phrase: Zeroizing<String>,
    pub private_key: PrivateKey,
    pub address: String,
}

/// 65-byte recoverable signature laid out as `r || s || v`, `v = 27 + recid`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| VaultError::InvalidInput(format!("signature is not hex: {e}")))?;
        let bytes: [u8; SIGNATURE_LEN] = raw
            .try_into()
            .map_err(|_| VaultError::InvalidInput(format!("signature must be {SIGNATURE_LEN} bytes")))?;
        Ok(Self(bytes))
    }
}

/// Generates a fresh twelve-word phrase and derives its first account.
///
/// # Errors
///
/// Returns an error if the entropy source fails or derivation fails.
pub fn generate_mnemonic() -> Result<DerivedAccount> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    getrandom::fill(&mut entropy[..]).map_err(|e| VaultError::Entropy(e.to_string()))?;
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| VaultError::InvalidMnemonic(e.to_string()))?;
    derive_account(&mnemonic, DEFAULT_DERIVATION_PATH)
}

/// Derives the account at [`DEFAULT_DERIVATION_PATH`] from `phrase`.
///
/// # Errors
///
/// Returns [`VaultError::InvalidMnemonic`] if the phrase is not twelve words
/// or fails checksum validation.
pub fn derive_from_mnemonic(phrase: &str) -> Result<DerivedAccount> {
    derive_from_mnemonic_at(phrase, DEFAULT_DERIVATION_PATH)
}

/// Derives the account at `path` from `phrase`.
///
/// # Errors
///
/// Returns [`VaultError::InvalidMnemonic`] for a bad phrase and
/// [`VaultError::InvalidInput`] for an unparsable path.
pub fn derive_from_mnemonic_at(phrase: &str, path: &str) -> Result<DerivedAccount> {
    let mnemonic = parse_mnemonic(phrase)?;
    derive_account(&mnemonic, path)
}

/// True when `phrase` is a valid twelve-word English phrase.
#[must_use]
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let words: Vec<String> = phrase.split_whitespace().map(str::to_lowercase).collect();
    if words.len() != WORD_COUNT {
        return Err(VaultError::InvalidMnemonic(format!(
            "expected {WORD_COUNT} words, got {}",
            words.len()
        )));
    }
    let normalized = Zeroizing::new(words.join(" "));
    Mnemonic::parse_in_normalized(Language::English, &normalized).map_err(|e| VaultError::InvalidMnemonic(e.to_string()))
}

fn derive_account(mnemonic: &Mnemonic, path: &str) -> Result<DerivedAccount> {
    let path = DerivationPath::from_str(path).map_err(|e| VaultError::InvalidInput(format!("derivation path: {e}")))?;
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let xprv = XPrv::derive_from_path(&seed[..], &path).map_err(|e| VaultError::Key(e.to_string()))?;
    let private_key = PrivateKey::from_slice(&xprv.private_key().to_bytes())?;
    let address = private_key.address()?;
    Ok(DerivedAccount {
        phrase: Zeroizing::new(mnemonic.to_string()),
        private_key,
        address,
    })
}

/// EIP-55 address of a raw private key.
///
/// # Errors
///
/// Returns [`VaultError::Key`] if `private_key` is not a valid scalar.
pub fn address_of(private_key: &[u8]) -> Result<String> {
    PrivateKey::from_slice(private_key)?.address()
}

fn address_of_verifying_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    to_checksum_address(&digest[12..])
}

/// Formats 20 address bytes with the EIP-55 mixed-case checksum.
#[must_use]
pub fn to_checksum_address(bytes: &[u8]) -> String {
    let lower = hex::encode(bytes);
    let hash = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let shift = if i % 2 == 0 { 4 } else { 0 };
        let nibble = (hash[i / 2] >> shift) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// True for `0x` followed by forty hex digits, in any case.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Signs `message` as an EIP-191 personal message.
///
/// # Errors
///
/// Returns [`VaultError::Key`] if signing fails.
pub fn sign_message(private_key: &PrivateKey, message: &[u8]) -> Result<Signature> {
    let digest = personal_message_digest(message);
    let (sig, recid) = private_key
        .signing_key()?
        .sign_prehash_recoverable(&digest)
        .map_err(|e| VaultError::Key(e.to_string()))?;
    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = 27 + recid.to_byte();
    Ok(Signature(out))
}

/// Recovers the EIP-55 address that produced `signature` over `message`.
///
/// # Errors
///
/// Returns [`VaultError::InvalidInput`] for a malformed signature and
/// [`VaultError::Key`] if no key can be recovered.
pub fn recover_address(message: &[u8], signature: &Signature) -> Result<String> {
    let digest = personal_message_digest(message);
    let v = signature.0[64];
    let recid = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| VaultError::InvalidInput(format!("bad recovery byte {v}")))?;
    let sig = EcdsaSignature::from_slice(&signature.0[..64]).map_err(|e| VaultError::InvalidInput(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recid).map_err(|e| VaultError::Key(e.to_string()))?;
    Ok(address_of_verifying_key(&key))
}

/// True when `signature` over `message` recovers to `address`.
#[must_use]
pub fn verify(message: &[u8], signature: &Signature, address: &str) -> bool {
    recover_address(message, signature).is_ok_and(|recovered| recovered.eq_ignore_ascii_case(address))
}

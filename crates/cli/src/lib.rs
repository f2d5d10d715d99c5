mod prompt;
mod utils;

pub use crate::prompt::{Prompt, ScriptedPrompt, TerminalPrompt};
use crate::utils::{format_relative_time, format_timestamp, short_address};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use keyward_vault::config::default_config_path;
use keyward_vault::mnemonic::{self, Signature};
use keyward_vault::{
    ConsistencyReport, KdfParams, KeyVaultService, StorageKind, VaultConfig, VaultError, VaultResponse, WalletStatus,
};
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    about = "A self-custodial key vault: your keys and recovery phrase never leave this device",
    long_about = "Keyward generates and stores secp256k1 wallet keys together with their 12-word \
                  recovery phrase. Every secret is sealed under your password before it touches \
                  disk and is only ever decrypted inside this process.\n\n\
                  Features:\n\
                  • BIP-39 recovery phrases, BIP-44 derivation (m/44'/60'/0'/0/0)\n\
                  • PBKDF2-SHA256 (or Argon2id) password derivation per record\n\
                  • XChaCha20-Poly1305 authenticated encryption\n\
                  • EIP-191 message signing and verification\n\n\
                  Quick start:\n\
                  1. keyward generate          # Create a wallet and write down the phrase\n\
                  2. keyward list              # See your wallets\n\
                  3. keyward sign <id> \"hello\" # Sign a message"
)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print `{success, data, error}` JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new wallet with a fresh 12-word recovery phrase
    Generate,

    /// Import a wallet from its 12-word recovery phrase
    Restore,

    /// List stored wallets (ids and addresses only)
    List,

    /// Unlock a wallet and print the address derived from its key
    Address {
        /// Wallet id or address
        target: String,
    },

    /// Reveal the recovery phrase of a wallet
    Export {
        /// Wallet id or address
        id: String,
    },

    /// Sign a message (EIP-191 personal message)
    Sign {
        /// Wallet id or address
        id: String,
        message: String,
    },

    /// Check a signature against an address. Needs no password.
    Verify {
        address: String,
        message: String,
        /// 65-byte hex signature
        signature: String,
    },

    /// Attach a deployed smart-account address to a wallet
    Link {
        /// Wallet id
        id: String,
        /// Account address to look the wallet up by
        account: String,
    },

    /// Permanently delete a wallet
    Delete {
        /// Wallet id
        id: String,
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
    },

    /// Check storage health and index consistency
    Doctor,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorReport {
    config_path: PathBuf,
    storage: StorageKind,
    storage_path: Option<PathBuf>,
    kdf: KdfParams,
    status: WalletStatus,
    consistency: ConsistencyReport,
}

#[derive(Debug, Serialize)]
struct Verification {
    valid: bool,
    recovered: Option<String>,
}

/// Runs one command against the terminal.
///
/// # Errors
///
/// Returns an error when the vault can't be opened or the command fails.
/// Only the coarse error kind is reported for vault failures.
pub async fn handle_command(cli: Cli) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli, &TerminalPrompt, &mut out).await
}

/// [`handle_command`] with injectable prompt and output.
///
/// # Errors
///
/// See [`handle_command`].
#[allow(clippy::too_many_lines)]
pub async fn run<P, W>(cli: Cli, prompt: &P, out: &mut W) -> Result<()>
where
    P: Prompt + ?Sized,
    W: Write,
{
    let json = cli.json;
    let config_path = cli.config.unwrap_or_else(default_config_path);

    if let Commands::Verify {
        address,
        message,
        signature,
    } = &cli.command
    {
        let result = Signature::from_str(signature).map(|sig| {
            let recovered = mnemonic::recover_address(message.as_bytes(), &sig).ok();
            Verification {
                valid: mnemonic::verify(message.as_bytes(), &sig, address),
                recovered,
            }
        });
        return emit(out, json, result, |out, v| {
            if v.valid {
                writeln!(out, "✅ Valid signature from {address}")
            } else {
                writeln!(out, "❌ Signature was not made by {address}")
            }
        });
    }

    let config = VaultConfig::load(&config_path).map_err(|e| eyre!("{e}"))?;
    let vault = KeyVaultService::from_config(&config).map_err(|e| eyre!("Failed to open vault: {e}"))?;

    match cli.command {
        Commands::Generate => {
            let password = prompt.new_password()?;
            emit(out, json, vault.generate(&password).await, |out, w| {
                writeln!(out, "✅ Created wallet {}", w.id)?;
                writeln!(out, "Address: {}", w.address)?;
                writeln!(out)?;
                writeln!(out, "Recovery phrase (shown once, write it down and keep it offline):")?;
                writeln!(out)?;
                writeln!(out, "    {}", w.mnemonic.as_str())?;
                writeln!(out)
            })
        }

        Commands::Restore => {
            let phrase = prompt.secret("Recovery phrase: ")?;
            let result = if mnemonic::validate_mnemonic(&phrase) {
                let password = prompt.new_password()?;
                vault.restore(&phrase, &password).await
            } else {
                Err(VaultError::InvalidMnemonic("rejected before password prompt".into()))
            };
            emit(out, json, result, |out, w| {
                writeln!(out, "✅ Restored wallet {}", w.id)?;
                writeln!(out, "Address: {}", w.address)
            })
        }

        Commands::List => emit(out, json, vault.list().await, |out, items| {
            if items.is_empty() {
                return writeln!(out, "No wallets yet. Run `keyward generate` or `keyward restore`.");
            }
            writeln!(out, "Found {} wallet(s):", items.len())?;
            writeln!(out, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
            for item in items {
                writeln!(
                    out,
                    "• {} {} - created {} ({})",
                    item.id,
                    item.address,
                    format_relative_time(item.created_at),
                    format_timestamp(item.created_at)
                )?;
                if let Some(account) = &item.account_address {
                    writeln!(out, "    linked account {}", short_address(account))?;
                }
            }
            Ok(())
        }),

        Commands::Address { target } => {
            let password = prompt.secret("Wallet password: ")?;
            let result = vault
                .unlock(&target, &password)
                .await
                .and_then(|key| key.address());
            emit(out, json, result, |out, address| writeln!(out, "{address}"))
        }

        Commands::Export { id } => {
            let password = prompt.secret("Wallet password: ")?;
            emit(out, json, vault.export(&id, &password).await, |out, phrase| {
                writeln!(out, "{}", phrase.as_str())
            })
        }

        Commands::Sign { id, message } => {
            let password = prompt.secret("Wallet password: ")?;
            let result = vault
                .sign(&id, &password, message.as_bytes())
                .await
                .map(|sig| sig.to_hex());
            emit(out, json, result, |out, sig| writeln!(out, "{sig}"))
        }

        Commands::Link { id, account } => emit(out, json, vault.link_account(&id, &account).await, |out, s| {
            writeln!(
                out,
                "✅ Linked {} to wallet {}",
                s.account_address.as_deref().unwrap_or_default(),
                s.id
            )
        }),

        Commands::Delete { id, yes } => {
            if !yes {
                let answer = prompt.line(&format!(
                    "Delete wallet {id}? Without its recovery phrase the key is gone for good. [y/N] "
                ))?;
                if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                    writeln!(out, "Aborted.")?;
                    return Ok(());
                }
            }
            let result = vault.delete(&id).await.map(|()| json!({ "deleted": id }));
            emit(out, json, result, |out, _| writeln!(out, "🗑️  Deleted wallet {id}"))
        }

        Commands::Doctor => {
            let result = match (vault.status().await, vault.check_consistency().await) {
                (Ok(status), Ok(consistency)) => Ok(DoctorReport {
                    config_path,
                    storage: config.storage.kind,
                    storage_path: (config.storage.kind == StorageKind::Sqlite).then(|| config.storage.resolved_path()),
                    kdf: vault.kdf_params().clone(),
                    status,
                    consistency,
                }),
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            emit(out, json, result, |out, r| {
                writeln!(out, "Config:   {}", r.config_path.display())?;
                match &r.storage_path {
                    Some(path) => writeln!(out, "Storage:  {:?} at {}", r.storage, path.display())?,
                    None => writeln!(out, "Storage:  {:?}", r.storage)?,
                }
                writeln!(out, "KDF:      {:?}", r.kdf)?;
                writeln!(out, "Wallets:  {}", r.consistency.records)?;
                if r.consistency.is_consistent() {
                    writeln!(out, "✅ Index and records are consistent")
                } else {
                    writeln!(out, "⚠️  Inconsistencies found:")?;
                    for id in &r.consistency.orphan_index_entries {
                        writeln!(out, "  - index entry without record: {id}")?;
                    }
                    for id in &r.consistency.unindexed_records {
                        writeln!(out, "  - record missing from index: {id}")?;
                    }
                    for address in &r.consistency.dangling_lookups {
                        writeln!(out, "  - lookup for {address} points nowhere")?;
                    }
                    Ok(())
                }
            })
        }

        Commands::Verify { .. } => Ok(()),
    }
}

/// Prints `result` as text or as a [`VaultResponse`].
fn emit<T, W, F>(out: &mut W, json: bool, result: keyward_vault::Result<T>, human: F) -> Result<()>
where
    T: Serialize,
    W: Write,
    F: FnOnce(&mut W, &T) -> std::io::Result<()>,
{
    if json {
        let failure = result.as_ref().err().map(user_error);
        let response = VaultResponse::from(result);
        writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?;
        return failure.map_or(Ok(()), Err);
    }
    match result {
        Ok(value) => {
            human(out, &value)?;
            Ok(())
        }
        Err(e) => Err(user_error(&e)),
    }
}

fn user_error(e: &VaultError) -> color_eyre::Report {
    debug!(error = %e, "command failed");
    match e {
        VaultError::InvalidInput(msg) => eyre!("invalid request: {msg}"),
        other => eyre!("{}", other.kind()),
    }
}

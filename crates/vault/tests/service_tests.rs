#![allow(clippy::unwrap_used)]
mod common;

use crate::common::{DEAD_ACCOUNT, HARDHAT_ADDRESS, HARDHAT_KEY, HARDHAT_PHRASE, PASSWORD, TestContext};
use keyward_vault::mnemonic;
use keyward_vault::store::LOOKUP_KEY;
use keyward_vault::{
    KdfAlgorithm, KdfParams, KeyVaultService, StorageKind, VaultConfig, VaultError, VaultResponse, WalletStatus,
};
use std::collections::HashSet;

#[tokio::test]
async fn test_create_and_unlock() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;
    assert!(mnemonic::is_valid_address(&wallet.address));
    assert_eq!(wallet.mnemonic.split_whitespace().count(), 12);
    assert_eq!(mnemonic::derive_from_mnemonic(&wallet.mnemonic)?.address, wallet.address);

    ctx.service.lock().await?;
    let key = ctx.service.unlock(&wallet.address, PASSWORD).await?;
    assert_eq!(key.address()?, wallet.address);
    assert_eq!(
        ctx.service.status().await?,
        WalletStatus::Unlocked {
            id: wallet.id.clone(),
            address: wallet.address.clone()
        }
    );

    ctx.service.lock().await?;
    let err = ctx.service.unlock(&wallet.address, "wrongpass").await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassword));
    assert_eq!(ctx.service.status().await?, WalletStatus::Locked);

    let phrase = ctx.service.export(&wallet.id, PASSWORD).await?;
    assert_eq!(phrase.as_str(), wallet.mnemonic.as_str());
    Ok(())
}

#[tokio::test]
async fn test_restore_reference_vector() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let restored = ctx.service.restore(HARDHAT_PHRASE, "pw2").await?;
    assert_eq!(restored.address, HARDHAT_ADDRESS);

    let key = ctx.service.unlock(&restored.id, "pw2").await?;
    assert_eq!(key.to_hex().as_str(), HARDHAT_KEY);

    let lower = HARDHAT_ADDRESS.to_lowercase();
    let key = ctx.service.unlock(&lower, "pw2").await?;
    assert_eq!(key.address()?, HARDHAT_ADDRESS);
    Ok(())
}

#[tokio::test]
async fn test_sign_and_verify() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let restored = ctx.service.restore(HARDHAT_PHRASE, "pw").await?;

    let sig = ctx.service.sign(&restored.id, "pw", b"hello world").await?;
    assert_eq!(sig.as_bytes().len(), 65);
    assert!(sig.as_bytes()[64] == 27 || sig.as_bytes()[64] == 28);
    assert!(mnemonic::verify(b"hello world", &sig, HARDHAT_ADDRESS));
    assert!(!mnemonic::verify(b"hello world!", &sig, HARDHAT_ADDRESS));

    let err = ctx.service.sign(&restored.id, "nope", b"hello").await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassword));
    Ok(())
}

#[tokio::test]
async fn test_delete_then_lookup() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;
    ctx.service.link_account(&wallet.id, DEAD_ACCOUNT).await?;

    ctx.service.delete(&wallet.id).await?;

    for target in [wallet.id.as_str(), wallet.address.as_str(), DEAD_ACCOUNT] {
        let err = ctx.service.unlock(target, PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)), "{target}: {err}");
    }
    assert!(ctx.service.list().await?.is_empty());
    assert_eq!(ctx.service.status().await?, WalletStatus::NoWallet);
    assert!(ctx.service.check_consistency().await?.is_consistent());

    // Deleting again is a no-op.
    ctx.service.delete(&wallet.id).await?;
    Ok(())
}

#[tokio::test]
async fn test_deleting_active_record_locks_session() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let a = ctx.service.generate(PASSWORD).await?;
    let b = ctx.service.generate(PASSWORD).await?;

    // b is active after generate; deleting a leaves it unlocked.
    ctx.service.delete(&a.id).await?;
    assert!(matches!(ctx.service.status().await?, WalletStatus::Unlocked { .. }));

    ctx.service.delete(&b.id).await?;
    assert!(!ctx.service.session().is_unlocked().await);
    Ok(())
}

#[tokio::test]
async fn test_account_alias_self_heals() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;
    let summary = ctx.service.link_account(&wallet.id, &DEAD_ACCOUNT.to_lowercase()).await?;
    assert_eq!(summary.account_address.as_deref(), Some(DEAD_ACCOUNT));

    ctx.backend.remove(&[LOOKUP_KEY])?;

    let key = ctx.service.unlock(DEAD_ACCOUNT, PASSWORD).await?;
    assert_eq!(key.address()?, wallet.address);

    let lookup: serde_json::Value = serde_json::from_str(&ctx.backend.get_one(LOOKUP_KEY)?.unwrap())?;
    assert_eq!(lookup[DEAD_ACCOUNT.to_lowercase()], wallet.id.as_str());
    Ok(())
}

#[tokio::test]
async fn test_restore_does_not_take_over_a_linked_account() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;
    ctx.service.link_account(&wallet.id, HARDHAT_ADDRESS).await?;

    let err = ctx.service.restore(HARDHAT_PHRASE, "pw2").await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidInput(_)), "{err}");

    let listed = ctx.service.list().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, wallet.id);
    assert_eq!(listed[0].address, wallet.address);
    assert_eq!(listed[0].account_address.as_deref(), Some(HARDHAT_ADDRESS));

    let key = ctx.service.unlock(&wallet.address, PASSWORD).await?;
    assert_eq!(key.address()?, wallet.address);
    assert_eq!(ctx.service.export(&wallet.id, PASSWORD).await?.as_str(), wallet.mnemonic.as_str());
    Ok(())
}

#[tokio::test]
async fn test_restore_of_stored_phrase_reseals_in_place() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let first = ctx.service.restore(HARDHAT_PHRASE, "old-pass").await?;
    let again = ctx.service.restore(HARDHAT_PHRASE, "new-pass").await?;

    assert_eq!(first, again);
    assert_eq!(ctx.service.list().await?.len(), 1);
    let err = ctx.service.unlock(HARDHAT_ADDRESS, "old-pass").await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassword));
    ctx.service.unlock(HARDHAT_ADDRESS, "new-pass").await?;
    Ok(())
}

#[tokio::test]
async fn test_link_account_rejects_own_address() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;

    for candidate in [wallet.address.clone(), wallet.address.to_lowercase()] {
        let err = ctx.service.link_account(&wallet.id, &candidate).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)), "{candidate}: {err}");
    }
    assert_eq!(ctx.service.list().await?[0].account_address, None);
    assert!(ctx.service.check_consistency().await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn test_salts_and_ivs_distinct_within_and_across_records() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let store = ctx.store();

    let mut seen = HashSet::new();
    for _ in 0..3 {
        let wallet = ctx.service.generate(PASSWORD).await?;
        let record = store.get_by_id(&wallet.id)?;
        for value in [
            record.salt.clone(),
            record.iv.clone(),
            record.mnemonic_salt.clone().unwrap(),
            record.mnemonic_iv.clone().unwrap(),
        ] {
            assert!(seen.insert(value), "nonce or salt reused");
        }
    }
    assert_eq!(seen.len(), 12);
    Ok(())
}

#[tokio::test]
async fn test_persisted_record_has_no_plaintext() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let restored = ctx.service.restore(HARDHAT_PHRASE, PASSWORD).await?;
    let record = ctx.store().get_by_id(&restored.id)?;
    let raw = serde_json::to_string(&record)?;

    assert!(!raw.contains(&HARDHAT_KEY[2..]));
    assert!(!raw.contains("junk"));
    assert!(!raw.contains(PASSWORD));
    assert_eq!(record.kdf, KdfParams::default());
    Ok(())
}

#[tokio::test]
async fn test_records_survive_restart_and_start_locked() -> color_eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = VaultConfig::default();
    config.storage.kind = StorageKind::Sqlite;
    config.storage.path = Some(dir.path().join("vault.sqlite3"));

    let id = {
        let service = KeyVaultService::from_config(&config)?;
        service.restore(HARDHAT_PHRASE, PASSWORD).await?.id
    };

    let service = KeyVaultService::from_config(&config)?;
    assert_eq!(service.status().await?, WalletStatus::Locked);
    assert_eq!(service.list().await?[0].id, id);
    service.unlock(&id, PASSWORD).await?;
    Ok(())
}

#[tokio::test]
async fn test_records_keep_their_kdf_after_config_change() -> color_eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = VaultConfig::default();
    config.storage.path = Some(dir.path().join("vault.sqlite3"));
    config.kdf.algorithm = KdfAlgorithm::Argon2id;
    config.kdf.m_cost_kib = 64;
    config.kdf.t_cost = 1;

    let id = {
        let service = KeyVaultService::from_config(&config)?;
        let w = service.generate(PASSWORD).await?;
        assert!(matches!(service.kdf_params(), KdfParams::Argon2id { .. }));
        w.id
    };

    config.kdf.algorithm = KdfAlgorithm::Pbkdf2Sha256;
    let service = KeyVaultService::from_config(&config)?;
    service.unlock(&id, PASSWORD).await?;
    service.export(&id, PASSWORD).await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_mnemonic_regardless_of_password() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let eleven = "test test test test test test test test test test junk";
    let thirteen = "test test test test test test test test test test test test junk";
    let bad_checksum = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
    for phrase in [eleven, thirteen, bad_checksum] {
        for password in [PASSWORD, "other"] {
            let err = ctx.service.restore(phrase, password).await.unwrap_err();
            assert!(matches!(err, VaultError::InvalidMnemonic(_)), "{phrase}");
        }
    }
    assert!(ctx.service.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_responses_carry_only_the_kind() -> color_eyre::Result<()> {
    let ctx = TestContext::new()?;
    let wallet = ctx.service.generate(PASSWORD).await?;

    let wrong: VaultResponse<_> = ctx
        .service
        .unlock(&wallet.id, "wrongpass")
        .await
        .map(|k| k.to_hex().to_string())
        .into();
    let json = serde_json::to_value(&wrong)?;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "invalid_password");
    assert_eq!(json["error"]["message"], "invalid password");

    let ok: VaultResponse<_> = ctx.service.list().await.into();
    let json = serde_json::to_value(&ok)?;
    assert_eq!(json["data"][0]["address"], wallet.address.as_str());
    Ok(())
}

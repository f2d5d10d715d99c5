use crate::backend::{StorageBackend, WriteBatch};
use crate::error::{Result, VaultError};
use crate::record::{RecordSummary, SecretRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const RECORD_PREFIX: &str = "keyward:record:";
pub const INDEX_KEY: &str = "keyward:index";
pub const LOOKUP_KEY: &str = "keyward:lookup";

type Index = Vec<String>;
type Lookup = BTreeMap<String, String>;

/// Result of cross-checking the index against the stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub records: usize,
    /// Ids listed in the index with no record behind them.
    pub orphan_index_entries: Vec<String>,
    /// Record ids missing from the index.
    pub unindexed_records: Vec<String>,
    /// Lookup addresses pointing at ids that have no record.
    pub dangling_lookups: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphan_index_entries.is_empty() && self.unindexed_records.is_empty() && self.dangling_lookups.is_empty()
    }
}

/// Persists [`SecretRecord`]s together with the id index and the address
/// lookup table.
#[derive(Debug)]
pub struct VaultStore {
    backend: Arc<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

fn record_key(id: &str) -> String {
    format!("{RECORD_PREFIX}{id}")
}

impl VaultStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Inserts or overwrites a record, keeping index and lookup in step.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the backend fails.
    pub fn put(&self, record: &SecretRecord) -> Result<()> {
        let _guard = self.lock_writes()?;
        let mut index = self.read_index()?;
        let mut lookup = self.read_lookup()?;

        if !index.contains(&record.id) {
            index.push(record.id.clone());
        }
        lookup.retain(|_, id| id != &record.id);
        lookup.insert(record.address.to_lowercase(), record.id.clone());
        if let Some(account) = &record.account_address {
            lookup.insert(account.to_lowercase(), record.id.clone());
        }

        self.backend.apply(
            WriteBatch::new()
                .put(record_key(&record.id), serde_json::to_string(record)?)
                .put(INDEX_KEY, serde_json::to_string(&index)?)
                .put(LOOKUP_KEY, serde_json::to_string(&lookup)?),
        )?;
        info!(id = %record.id, address = %record.address, "stored wallet record");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] when no record has this id.
    pub fn get_by_id(&self, id: &str) -> Result<SecretRecord> {
        self.read_record(id)?
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }

    /// Resolves `address` (primary or account address, any case).
    ///
    /// Tries the lookup table first, then scans every record. A scan hit
    /// writes the lookup entry so the next call is direct.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] when no record matches.
    pub fn get_by_address(&self, address: &str) -> Result<SecretRecord> {
        let needle = address.to_lowercase();
        let lookup = self.read_lookup()?;

        let mut stale = false;
        if let Some(id) = lookup.get(&needle) {
            match self.read_record(id)? {
                Some(record) if record.matches_address(&needle) => {
                    debug!(%id, "address resolved via lookup");
                    return Ok(record);
                }
                _ => {
                    debug!(%id, address = %needle, "stale lookup entry");
                    stale = true;
                }
            }
        }

        let hit = self.scan(|r| r.matches_address(&needle))?;
        match hit {
            Some(record) => {
                self.heal_lookup(&needle, &record.id)?;
                Ok(record)
            }
            None => {
                if stale {
                    self.drop_lookup(&needle)?;
                }
                Err(VaultError::NotFound(address.to_string()))
            }
        }
    }

    /// Metadata for every indexed record, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the backend fails.
    pub fn list_all(&self) -> Result<Vec<RecordSummary>> {
        Ok(self.read_all()?.iter().map(SecretRecord::summary).collect())
    }

    /// Number of indexed ids.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the backend fails.
    pub fn count(&self) -> Result<usize> {
        Ok(self.read_index()?.len())
    }

    /// Removes the record, its index entry and every lookup pointing at it.
    /// Deleting an unknown id is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the backend fails.
    pub fn delete_by_id(&self, id: &str) -> Result<()> {
        let _guard = self.lock_writes()?;
        let mut index = self.read_index()?;
        let mut lookup = self.read_lookup()?;
        let before = (index.len(), lookup.len());

        index.retain(|i| i != id);
        lookup.retain(|_, v| v != id);

        let mut batch = WriteBatch::new().remove(record_key(id));
        if before != (index.len(), lookup.len()) {
            batch = batch
                .put(INDEX_KEY, serde_json::to_string(&index)?)
                .put(LOOKUP_KEY, serde_json::to_string(&lookup)?);
        }
        self.backend.apply(batch)?;
        info!(%id, "deleted wallet record");
        Ok(())
    }

    /// Attaches `address` as the record's account address, replacing any
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] when `id` has no record and
    /// [`VaultError::InvalidInput`] when `address` is the record's own
    /// address.
    pub fn add_address_alias(&self, address: &str, id: &str) -> Result<SecretRecord> {
        let _guard = self.lock_writes()?;
        let mut record = self
            .read_record(id)?
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        if record.address.eq_ignore_ascii_case(address) {
            return Err(VaultError::InvalidInput(format!("{address} is already the wallet's own address")));
        }
        let mut lookup = self.read_lookup()?;

        if let Some(previous) = record.account_address.take() {
            let previous = previous.to_lowercase();
            if lookup.get(&previous).is_some_and(|v| v == id) {
                lookup.remove(&previous);
            }
        }
        record.account_address = Some(address.to_string());
        lookup.insert(address.to_lowercase(), id.to_string());

        self.backend.apply(
            WriteBatch::new()
                .put(record_key(id), serde_json::to_string(&record)?)
                .put(LOOKUP_KEY, serde_json::to_string(&lookup)?),
        )?;
        info!(%id, account = %address, "linked account address");
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`VaultError::StorageUnavailable`] if the backend fails.
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        let index = self.read_index()?;
        let lookup = self.read_lookup()?;
        let stored: BTreeSet<String> = self
            .backend
            .keys_with_prefix(RECORD_PREFIX)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(RECORD_PREFIX).map(str::to_string))
            .collect();
        let indexed: BTreeSet<&String> = index.iter().collect();

        Ok(ConsistencyReport {
            records: stored.len(),
            orphan_index_entries: index.iter().filter(|id| !stored.contains(*id)).cloned().collect(),
            unindexed_records: stored.iter().filter(|id| !indexed.contains(id)).cloned().collect(),
            dangling_lookups: lookup
                .iter()
                .filter(|(_, id)| !stored.contains(*id))
                .map(|(addr, _)| addr.clone())
                .collect(),
        })
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("store write lock poisoned".into()))
    }

    fn read_index(&self) -> Result<Index> {
        match self.backend.get_one(INDEX_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn read_lookup(&self) -> Result<Lookup> {
        match self.backend.get_one(LOOKUP_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn read_record(&self, id: &str) -> Result<Option<SecretRecord>> {
        match self.backend.get_one(&record_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn read_all(&self) -> Result<Vec<SecretRecord>> {
        let index = self.read_index()?;
        let keys: Vec<String> = index.iter().map(|id| record_key(id)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut raw = self.backend.get(&key_refs)?;

        let mut records = Vec::with_capacity(index.len());
        for (id, key) in index.iter().zip(&keys) {
            match raw.remove(key) {
                Some(value) => records.push(serde_json::from_str(&value)?),
                None => warn!(%id, "index entry without record"),
            }
        }
        Ok(records)
    }

    fn scan(&self, pred: impl Fn(&SecretRecord) -> bool) -> Result<Option<SecretRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| pred(r)))
    }

    fn heal_lookup(&self, address: &str, id: &str) -> Result<()> {
        let _guard = self.lock_writes()?;
        if self.read_record(id)?.is_none() {
            return Ok(());
        }
        let mut lookup = self.read_lookup()?;
        lookup.insert(address.to_string(), id.to_string());
        self.backend
            .apply(WriteBatch::new().put(LOOKUP_KEY, serde_json::to_string(&lookup)?))?;
        debug!(%id, %address, "repaired address lookup");
        Ok(())
    }

    fn drop_lookup(&self, address: &str) -> Result<()> {
        let _guard = self.lock_writes()?;
        let mut lookup = self.read_lookup()?;
        if lookup.remove(address).is_some() {
            self.backend
                .apply(WriteBatch::new().put(LOOKUP_KEY, serde_json::to_string(&lookup)?))?;
            debug!(%address, "dropped stale address lookup");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::crypto::{KdfParams, Sealed};
    use tempfile::TempDir;
    use time::OffsetDateTime;

    fn tmp_store() -> (TempDir, VaultStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("vault.sqlite3")).unwrap();
        (dir, VaultStore::new(Arc::new(backend)))
    }

    fn record(id: &str, address: &str) -> SecretRecord {
        let sealed = Sealed {
            salt: vec![1; 16],
            iv: vec![2; 24],
            ciphertext: vec![3; 48],
        };
        SecretRecord::from_sealed(
            id.into(),
            address.into(),
            KdfParams::default(),
            &sealed,
            None,
            OffsetDateTime::now_utc(),
        )
    }

    fn addr(n: u8) -> String {
        format!("0x{:0>40}", format!("{n:x}Ab"))
    }

    #[test]
    fn test_put_then_get_by_id_and_address() {
        let (_dir, store) = tmp_store();
        let r = record("a", &addr(1));
        store.put(&r).unwrap();

        assert_eq!(store.get_by_id("a").unwrap(), r);
        assert_eq!(store.get_by_address(&addr(1).to_uppercase().replace("0X", "0x")).unwrap().id, "a");
        assert!(matches!(store.get_by_id("b"), Err(VaultError::NotFound(_))));
        assert!(matches!(store.get_by_address(&addr(2)), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_put_overwrite_does_not_duplicate_index() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        store.put(&record("a", &addr(1))).unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);
        assert!(store.check_consistency().unwrap().is_consistent());
    }

    #[test]
    fn test_list_all_keeps_insertion_order() {
        let (_dir, store) = tmp_store();
        for (i, id) in ["z", "m", "a"].iter().enumerate() {
            store.put(&record(id, &addr(u8::try_from(i).unwrap()))).unwrap();
        }
        let ids: Vec<_> = store.list_all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_delete_is_idempotent_and_clears_lookups() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        store.add_address_alias(&addr(9), "a").unwrap();

        store.delete_by_id("a").unwrap();
        store.delete_by_id("a").unwrap();
        store.delete_by_id("never-existed").unwrap();

        assert!(matches!(store.get_by_id("a"), Err(VaultError::NotFound(_))));
        assert!(matches!(store.get_by_address(&addr(1)), Err(VaultError::NotFound(_))));
        assert!(matches!(store.get_by_address(&addr(9)), Err(VaultError::NotFound(_))));
        let report = store.check_consistency().unwrap();
        assert!(report.is_consistent(), "{report:?}");
        assert_eq!(report.records, 0);
    }

    #[test]
    fn test_alias_requires_existing_record() {
        let (_dir, store) = tmp_store();
        assert!(matches!(
            store.add_address_alias(&addr(9), "missing"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_alias_rejects_own_address() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        assert!(matches!(
            store.add_address_alias(&addr(1).to_uppercase().replace("0X", "0x"), "a"),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(store.get_by_id("a").unwrap().account_address.is_none());
    }

    #[test]
    fn test_alias_replaces_previous_account_address() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        store.add_address_alias(&addr(8), "a").unwrap();
        store.add_address_alias(&addr(9), "a").unwrap();

        assert_eq!(store.get_by_id("a").unwrap().account_address.as_deref(), Some(addr(9).as_str()));
        assert_eq!(store.get_by_address(&addr(9)).unwrap().id, "a");
        assert!(matches!(store.get_by_address(&addr(8)), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_missing_lookup_is_healed_by_scan() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        store.add_address_alias(&addr(9), "a").unwrap();

        // Simulate an older writer that never maintained the lookup table.
        store.backend().remove(&[LOOKUP_KEY]).unwrap();

        assert_eq!(store.get_by_address(&addr(9)).unwrap().id, "a");
        let raw = store.backend().get_one(LOOKUP_KEY).unwrap().unwrap();
        let lookup: Lookup = serde_json::from_str(&raw).unwrap();
        assert_eq!(lookup.get(&addr(9).to_lowercase()).map(String::as_str), Some("a"));
    }

    #[test]
    fn test_stale_lookup_is_repaired() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();

        let mut lookup = Lookup::new();
        lookup.insert(addr(1).to_lowercase(), "ghost".into());
        lookup.insert(addr(5).to_lowercase(), "ghost".into());
        store
            .backend()
            .set(vec![(LOOKUP_KEY.into(), serde_json::to_string(&lookup).unwrap())])
            .unwrap();

        assert_eq!(store.get_by_address(&addr(1)).unwrap().id, "a");
        assert!(matches!(store.get_by_address(&addr(5)), Err(VaultError::NotFound(_))));

        let report = store.check_consistency().unwrap();
        assert!(report.is_consistent(), "{report:?}");
    }

    #[test]
    fn test_index_consistent_after_mixed_operations() {
        let (_dir, store) = tmp_store();
        let mut live = BTreeSet::new();
        let mut state: u32 = 0x2545_f491;

        for _ in 0..60 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let n = u8::try_from(state % 8).unwrap();
            let id = format!("id-{n}");
            if state % 3 == 0 {
                store.delete_by_id(&id).unwrap();
                live.remove(&id);
            } else {
                store.put(&record(&id, &addr(n))).unwrap();
                live.insert(id);
            }
            let report = store.check_consistency().unwrap();
            assert!(report.is_consistent(), "{report:?}");
            assert_eq!(report.records, live.len());
        }

        let listed: BTreeSet<_> = store.list_all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, live);
        assert_eq!(store.count().unwrap(), live.len());
    }

    #[test]
    fn test_consistency_report_flags_damage() {
        let (_dir, store) = tmp_store();
        store.put(&record("a", &addr(1))).unwrap();
        store
            .backend()
            .set(vec![
                (INDEX_KEY.into(), r#"["a","ghost"]"#.into()),
                (record_key("stray"), serde_json::to_string(&record("stray", &addr(2))).unwrap()),
            ])
            .unwrap();

        let report = store.check_consistency().unwrap();
        assert_eq!(report.orphan_index_entries, vec!["ghost"]);
        assert_eq!(report.unindexed_records, vec!["stray"]);
        assert!(!report.is_consistent());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }
}

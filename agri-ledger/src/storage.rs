//! World-state substrate
//!
//! [`StateStore`] is the contract the state machine needs from the ledger
//! substrate: point reads, half-open range scans, per-key history, index
//! scans and one atomic commit per transaction. [`Storage`] implements it on
//! RocksDB; [`crate::memory::MemoryStorage`] implements it in process.
//!
//! # Column Families
//!
//! - `state` - Current value per key (key: `TYPE::id`)
//! - `history` - Every committed value (key: `TYPE::id` || 0x00 || commit seq)
//! - `indices` - Secondary index (key: kind || 0x00 || parent || 0x00 || id)
//! - `meta` - Commit height

use crate::{
    config::{Config, StorageBackend},
    error::{Error, Result},
    keys::StateKey,
    memory::MemoryStorage,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Column family names
const CF_STATE: &str = "state";
const CF_HISTORY: &str = "history";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

const META_COMMIT_HEIGHT: &[u8] = b"commit_height";

/// One committed value of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transaction that wrote the value
    pub tx_id: String,
    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,
    /// Commit sequence number
    pub commit_seq: u64,
    /// Value written
    pub value: Vec<u8>,
}

/// Write set of one transaction, applied all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// Transaction id
    pub tx_id: String,
    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,
    /// Key → new value
    pub writes: BTreeMap<StateKey, Vec<u8>>,
    /// Index key → indexed state key
    pub index_entries: BTreeMap<Vec<u8>, StateKey>,
}

impl CommitBatch {
    /// True when the transaction wrote nothing
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.index_entries.is_empty()
    }
}

/// Substrate contract consumed by the state machine
pub trait StateStore: Send + Sync {
    /// Current value of `key`
    fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>>;

    /// Every `(key, value)` with `start <= key < end`, in key order
    fn get_state_by_range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Every value ever committed to `key`, oldest first
    fn get_history_for_key(&self, key: &StateKey) -> Result<Vec<HistoryEntry>>;

    /// State keys indexed under `prefix`, in index key order
    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<StateKey>>;

    /// Apply a write set atomically, returning its commit sequence number
    fn commit(&self, batch: &CommitBatch) -> Result<u64>;

    /// Sequence number of the last commit (0 before the first)
    fn commit_height(&self) -> Result<u64>;
}

/// Open the store selected by `config.storage.backend`
pub fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.storage.backend {
        StorageBackend::RocksDb => Ok(Arc::new(Storage::open(config)?)),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory world state; nothing survives a restart");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

/// History key: state key || 0x00 || seq (big endian, so scans are oldest first)
pub(crate) fn history_key(key: &StateKey, seq: u64) -> Vec<u8> {
    let mut out = history_prefix(key);
    out.extend_from_slice(&seq.to_be_bytes());
    out
}

pub(crate) fn history_prefix(key: &StateKey) -> Vec<u8> {
    let mut out = key.as_str().as_bytes().to_vec();
    out.push(0);
    out
}

fn decode_key(raw: &[u8]) -> Result<StateKey> {
    let raw = std::str::from_utf8(raw).map_err(|e| Error::Storage(format!("Non UTF-8 key: {}", e)))?;
    StateKey::parse(raw)
}

/// RocksDB-backed world state
pub struct Storage {
    db: Arc<DB>,
    // Serializes commits so each one gets its own sequence number
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.storage.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.storage.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.storage.max_background_jobs);

        if config.storage.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB world state");

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Every `(key, value)` in `cf` starting with `prefix`
    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn read_commit_height(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_COMMIT_HEIGHT)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed commit height".to_string()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl StateStore for Storage {
    fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_STATE)?;
        Ok(self.db.get_cf(cf, key.as_str().as_bytes())?)
    }

    fn get_state_by_range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let cf = self.cf_handle(CF_STATE)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(start.as_bytes(), Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if &key[..] >= end.as_bytes() {
                break;
            }
            let key = String::from_utf8(key.into_vec())
                .map_err(|e| Error::Storage(format!("Non UTF-8 key: {}", e)))?;
            out.push((key, value.into_vec()));
        }
        Ok(out)
    }

    fn get_history_for_key(&self, key: &StateKey) -> Result<Vec<HistoryEntry>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        self.scan_prefix(cf, &history_prefix(key))?
            .into_iter()
            .map(|(_, value)| Ok(bincode::deserialize::<HistoryEntry>(&value)?))
            .collect()
    }

    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<StateKey>> {
        let cf = self.cf_handle(CF_INDICES)?;
        self.scan_prefix(cf, prefix)?
            .into_iter()
            .map(|(_, value)| decode_key(&value))
            .collect()
    }

    fn commit(&self, batch: &CommitBatch) -> Result<u64> {
        let _guard = self.commit_lock.lock();
        let seq = self.read_commit_height()? + 1;

        let cf_state = self.cf_handle(CF_STATE)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut wb = WriteBatch::default();

        for (key, value) in &batch.writes {
            wb.put_cf(cf_state, key.as_str().as_bytes(), value);

            let entry = HistoryEntry {
                tx_id: batch.tx_id.clone(),
                timestamp: batch.timestamp,
                commit_seq: seq,
                value: value.clone(),
            };
            wb.put_cf(cf_history, history_key(key, seq), bincode::serialize(&entry)?);
        }

        for (index_key, state_key) in &batch.index_entries {
            wb.put_cf(cf_indices, index_key, state_key.as_str().as_bytes());
        }

        wb.put_cf(cf_meta, META_COMMIT_HEIGHT, seq.to_be_bytes());

        // Atomic commit
        self.db.write(wb)?;

        tracing::debug!(
            tx_id = %batch.tx_id,
            commit_seq = seq,
            writes = batch.writes.len(),
            "Write set committed"
        );

        Ok(seq)
    }

    fn commit_height(&self) -> Result<u64> {
        self.read_commit_height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{index_key, index_prefix, RecordKind};
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn batch_of(tx: &str, writes: &[(&str, &str)]) -> CommitBatch {
        CommitBatch {
            tx_id: tx.to_string(),
            timestamp: Utc::now(),
            writes: writes
                .iter()
                .map(|(k, v)| (StateKey::parse(k).unwrap(), v.as_bytes().to_vec()))
                .collect(),
            index_entries: BTreeMap::new(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_STATE).is_some());
        assert!(storage.db.cf_handle(CF_HISTORY).is_some());
        assert_eq!(storage.commit_height().unwrap(), 0);
    }

    #[test]
    fn test_commit_and_get() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let seq = storage
            .commit(&batch_of("tx1", &[("BATCH::B1", "one"), ("CERT::C1", "cert")]))
            .unwrap();
        assert_eq!(seq, 1);

        let key = StateKey::parse("BATCH::B1").unwrap();
        assert_eq!(storage.get_state(&key).unwrap(), Some(b"one".to_vec()));
        assert_eq!(
            storage.get_state(&StateKey::parse("BATCH::B2").unwrap()).unwrap(),
            None
        );
    }

    #[test]
    fn test_range_is_half_open_and_ordered() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        storage
            .commit(&batch_of(
                "tx1",
                &[
                    ("TRANSFER::b", "2"),
                    ("TRANSFER::a", "1"),
                    ("TRANSFER::~", "3"),
                    ("PAYMENT::x", "p"),
                    ("BATCH::z", "b"),
                ],
            ))
            .unwrap();

        let (start, end) = RecordKind::Transfer.key_range();
        let rows = storage.get_state_by_range(&start, &end).unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["TRANSFER::a", "TRANSFER::b", "TRANSFER::~"]);
    }

    #[test]
    fn test_history_oldest_first() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        for (i, tx) in ["tx1", "tx2", "tx3"].iter().enumerate() {
            let value = format!("v{}", i);
            storage.commit(&batch_of(tx, &[("BATCH::B1", value.as_str())])).unwrap();
        }
        // A neighbouring key must not leak into B1's history
        storage.commit(&batch_of("tx4", &[("BATCH::B10", "other")])).unwrap();

        let history = storage
            .get_history_for_key(&StateKey::parse("BATCH::B1").unwrap())
            .unwrap();
        let values: Vec<Vec<u8>> = history.iter().map(|h| h.value.clone()).collect();
        assert_eq!(values, vec![b"v0".to_vec(), b"v1".to_vec(), b"v2".to_vec()]);
        assert_eq!(history[0].tx_id, "tx1");
        assert_eq!(storage.commit_height().unwrap(), 4);
    }

    #[test]
    fn test_index_scan() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let mut batch = batch_of("tx1", &[("CERT::C1", "c")]);
        batch.index_entries.insert(
            index_key(RecordKind::Cert, "B1", "C1"),
            StateKey::parse("CERT::C1").unwrap(),
        );
        batch.index_entries.insert(
            index_key(RecordKind::Cert, "B10", "C2"),
            StateKey::parse("CERT::C2").unwrap(),
        );
        storage.commit(&batch).unwrap();

        let keys = storage.scan_index(&index_prefix(RecordKind::Cert, "B1")).unwrap();
        assert_eq!(keys, vec![StateKey::parse("CERT::C1").unwrap()]);
    }

    #[test]
    fn test_state_survives_reopen() {
        let (config, _temp) = test_config();
        {
            let storage = Storage::open(&config).unwrap();
            storage.commit(&batch_of("tx1", &[("ORDER::O1", "o")])).unwrap();
            storage.close().unwrap();
        }
        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.commit_height().unwrap(), 1);
        assert!(storage
            .get_state(&StateKey::parse("ORDER::O1").unwrap())
            .unwrap()
            .is_some());
    }
}

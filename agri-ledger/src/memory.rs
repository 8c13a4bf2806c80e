//! In-process world state
//!
//! Same contract as the RocksDB store, backed by ordered maps behind one
//! lock. Used by tests and by nodes configured with `backend = "memory"`.

use crate::{
    error::Result,
    keys::StateKey,
    storage::{CommitBatch, HistoryEntry, StateStore},
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Default)]
struct MemoryState {
    state: BTreeMap<String, Vec<u8>>,
    history: BTreeMap<String, Vec<HistoryEntry>>,
    indices: BTreeMap<Vec<u8>, StateKey>,
    height: u64,
}

/// In-memory world state
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryState>,
}

impl MemoryStorage {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStorage {
    fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().state.get(key.as_str()).cloned())
    }

    fn get_state_by_range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        Ok(inner
            .state
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn get_history_for_key(&self, key: &StateKey) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .inner
            .read()
            .history
            .get(key.as_str())
            .cloned()
            .unwrap_or_default())
    }

    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<StateKey>> {
        let inner = self.inner.read();
        Ok(inner
            .indices
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn commit(&self, batch: &CommitBatch) -> Result<u64> {
        let mut inner = self.inner.write();
        inner.height += 1;
        let seq = inner.height;

        for (key, value) in &batch.writes {
            inner.state.insert(key.to_string(), value.clone());
            inner
                .history
                .entry(key.to_string())
                .or_default()
                .push(HistoryEntry {
                    tx_id: batch.tx_id.clone(),
                    timestamp: batch.timestamp,
                    commit_seq: seq,
                    value: value.clone(),
                });
        }

        for (index_key, state_key) in &batch.index_entries {
            inner.indices.insert(index_key.clone(), state_key.clone());
        }

        Ok(seq)
    }

    fn commit_height(&self) -> Result<u64> {
        Ok(self.inner.read().height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RecordKind;
    use chrono::Utc;

    fn write(store: &MemoryStorage, tx: &str, key: &str, value: &str) {
        let mut batch = CommitBatch {
            tx_id: tx.to_string(),
            timestamp: Utc::now(),
            ..Default::default()
        };
        batch
            .writes
            .insert(StateKey::parse(key).unwrap(), value.as_bytes().to_vec());
        store.commit(&batch).unwrap();
    }

    #[test]
    fn test_range_matches_prefix_only() {
        let store = MemoryStorage::new();
        write(&store, "t1", "CERT::b", "2");
        write(&store, "t2", "CERT::a", "1");
        write(&store, "t3", "BATCH::a", "x");
        write(&store, "t4", "TRANSFER::a", "y");

        let (start, end) = RecordKind::Cert.key_range();
        let keys: Vec<String> = store
            .get_state_by_range(&start, &end)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["CERT::a".to_string(), "CERT::b".to_string()]);
    }

    #[test]
    fn test_history_appends() {
        let store = MemoryStorage::new();
        write(&store, "t1", "PAYMENT::P1", "locked");
        write(&store, "t2", "PAYMENT::P1", "released");

        let history = store
            .get_history_for_key(&StateKey::parse("PAYMENT::P1").unwrap())
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tx_id, "t1");
        assert_eq!(history[1].value, b"released".to_vec());
        assert_eq!(store.commit_height().unwrap(), 2);
    }
}

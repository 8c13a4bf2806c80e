//! Per-transaction execution context
//!
//! A [`TxContext`] is created for every submitted operation. Reads go to
//! the committed world state, overlaid with the transaction's own pending
//! writes; writes are buffered and only reach the store when the runtime
//! commits the whole write set. An operation that returns an error simply
//! drops its context, so nothing it wrote is ever visible.

use crate::events::ContractEvent;
use crate::keys::{index_key, StateKey};
use crate::records::LedgerRecord;
use crate::storage::{CommitBatch, StateStore};
use crate::types::Caller;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Execution context of one transaction
pub struct TxContext<'a> {
    store: &'a dyn StateStore,
    caller: Caller,
    tx_id: String,
    timestamp: DateTime<Utc>,
    writes: BTreeMap<StateKey, Vec<u8>>,
    index_entries: BTreeMap<Vec<u8>, StateKey>,
    event: Option<ContractEvent>,
}

impl std::fmt::Debug for TxContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("caller", &self.caller)
            .field("tx_id", &self.tx_id)
            .field("timestamp", &self.timestamp)
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

impl<'a> TxContext<'a> {
    /// Context for a transaction `tx_id` submitted by `caller` at `timestamp`
    pub fn new(
        store: &'a dyn StateStore,
        caller: Caller,
        tx_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            caller,
            tx_id: tx_id.into(),
            timestamp,
            writes: BTreeMap::new(),
            index_entries: BTreeMap::new(),
            event: None,
        }
    }

    /// Verified identity of the invoker
    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Unique id of this transaction
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Transaction timestamp, identical for every participant
    pub fn tx_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw value at `key`, seeing this transaction's own writes
    pub fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(Some(pending.clone()));
        }
        self.store.get_state(key)
    }

    /// True when `key` holds a value
    pub fn exists(&self, key: &StateKey) -> Result<bool> {
        Ok(self.get_state(key)?.is_some())
    }

    /// Typed load; `None` when the key is empty
    pub fn get_record<T: LedgerRecord>(&self, key: &StateKey) -> Result<Option<T>> {
        match self.get_state(key)? {
            Some(bytes) => Ok(Some(T::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage a full-record overwrite and its index entry
    pub fn put_record<T: LedgerRecord>(&mut self, record: &T) -> Result<()> {
        let key = record.key();
        if let Some(parent) = record.index_parent() {
            self.index_entries
                .insert(index_key(T::KIND, parent, key.id()), key.clone());
        }
        let bytes = record.clone().into_record().to_bytes()?;
        self.writes.insert(key, bytes);
        Ok(())
    }

    /// Set the event published once this transaction commits.
    ///
    /// Only one event survives per transaction; a later call replaces an
    /// earlier one.
    pub fn set_event(&mut self, event: ContractEvent) {
        self.event = Some(event);
    }

    /// Hand the buffered write set and event over for commit
    pub fn into_commit(self) -> (CommitBatch, Option<ContractEvent>) {
        let batch = CommitBatch {
            tx_id: self.tx_id,
            timestamp: self.timestamp,
            writes: self.writes,
            index_entries: self.index_entries,
        };
        (batch, self.event)
    }
}

//! Composite state keys
//!
//! Every record lives at `"<TYPE>::<id>"`. The type prefix partitions the
//! shared namespace so a range scan over one prefix visits exactly one
//! record type, in id order.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between type prefix and id
pub const KEY_SEPARATOR: &str = "::";

/// Record type discriminator, shared by keys and the `objectType` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    /// Produce batch
    Batch,
    /// Inspection certificate
    Cert,
    /// Custody transfer
    Transfer,
    /// Buyer order
    Order,
    /// Escrow payment
    Payment,
    /// Recall / fraud record
    Invalidation,
}

impl RecordKind {
    /// All kinds, in prefix order
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Batch,
        RecordKind::Cert,
        RecordKind::Transfer,
        RecordKind::Order,
        RecordKind::Payment,
        RecordKind::Invalidation,
    ];

    /// Key prefix (also the `objectType` tag)
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordKind::Batch => "BATCH",
            RecordKind::Cert => "CERT",
            RecordKind::Transfer => "TRANSFER",
            RecordKind::Order => "ORDER",
            RecordKind::Payment => "PAYMENT",
            RecordKind::Invalidation => "INVALIDATION",
        }
    }

    /// Parse from prefix
    pub fn from_prefix(s: &str) -> Option<Self> {
        RecordKind::ALL.into_iter().find(|kind| kind.prefix() == s)
    }

    /// Half-open `[start, end)` range covering every key of this kind.
    ///
    /// The end bound is the prefix with its final `:` bumped to `;`, so ids
    /// containing any byte value stay inside the range.
    pub fn key_range(&self) -> (String, String) {
        let start = format!("{}{}", self.prefix(), KEY_SEPARATOR);
        let end = format!("{}:;", self.prefix());
        (start, end)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Composite state key `"<TYPE>::<id>"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// Build a key for a record of `kind` with `id`
    pub fn new(kind: RecordKind, id: &str) -> Self {
        Self(format!("{}{}{}", kind.prefix(), KEY_SEPARATOR, id))
    }

    /// Parse a raw key, rejecting unknown prefixes
    pub fn parse(raw: &str) -> Result<Self> {
        let (prefix, id) = raw
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| Error::InvalidArgument(format!("Malformed key {}", raw)))?;
        if RecordKind::from_prefix(prefix).is_none() {
            return Err(Error::InvalidArgument(format!(
                "Unknown record type {} in key {}",
                prefix, raw
            )));
        }
        if id.is_empty() {
            return Err(Error::InvalidArgument(format!("Empty id in key {}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    /// Record kind encoded in the prefix
    pub fn kind(&self) -> RecordKind {
        self.0
            .split_once(KEY_SEPARATOR)
            .and_then(|(prefix, _)| RecordKind::from_prefix(prefix))
            .unwrap_or(RecordKind::Batch)
    }

    /// Id part of the key
    pub fn id(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map(|(_, id)| id)
            .unwrap_or_default()
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secondary index key: `kind \0 batch_id \0 record_id`
pub fn index_key(kind: RecordKind, batch_id: &str, record_id: &str) -> Vec<u8> {
    let mut key = index_prefix(kind, batch_id);
    key.extend_from_slice(record_id.as_bytes());
    key
}

/// Prefix shared by every index entry of `kind` under `batch_id`
pub fn index_prefix(kind: RecordKind, batch_id: &str) -> Vec<u8> {
    let mut key = kind.prefix().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(batch_id.as_bytes());
    key.push(0);
    key
}

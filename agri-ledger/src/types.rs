//! Core identity types for the ledger
//!
//! Foreign keys are typed so a `BatchId` can never be handed to a lookup
//! that expects an `OrderId`, and each id knows the key prefix it lives
//! under.

use crate::keys::{RecordKind, StateKey};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get as string
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// State key this record is stored under
            pub fn key(&self) -> StateKey {
                StateKey::new($kind, &self.0)
            }

            /// Reject ids that cannot be stored unambiguously
            pub fn validate(&self) -> Result<()> {
                validate_token(stringify!($name), &self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

record_id!(
    /// Produce batch identifier (caller-assigned)
    BatchId => RecordKind::Batch
);
record_id!(
    /// Certificate identifier
    CertId => RecordKind::Cert
);
record_id!(
    /// Transfer identifier
    TransferId => RecordKind::Transfer
);
record_id!(
    /// Order identifier
    OrderId => RecordKind::Order
);
record_id!(
    /// Payment identifier
    PaymentId => RecordKind::Payment
);
record_id!(
    /// Invalidation identifier
    InvalidationId => RecordKind::Invalidation
);

/// Ids are embedded in keys and NUL-separated index entries
pub(crate) fn validate_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    if value.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "{} must not contain NUL bytes",
            what
        )));
    }
    Ok(())
}

/// Organization MSP identifier (e.g. `Org2MSP`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MspId(String);

impl MspId {
    /// Create new MSP id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MspId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MspId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Organizational role in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Grows and registers produce
    Farmer,
    /// Operates the marketplace and escrow
    Platform,
    /// Buys, holds and resells produce
    Middleman,
    /// Inspects and certifies batches
    Inspector,
}

impl Role {
    /// All roles
    pub const ALL: [Role; 4] = [Role::Farmer, Role::Platform, Role::Middleman, Role::Inspector];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Farmer => "Farmer",
            Role::Platform => "Platform",
            Role::Middleman => "Middleman",
            Role::Inspector => "Inspector",
        };
        f.write_str(name)
    }
}

/// Verified identity of the invoker, as handed over by the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Organization the caller's certificate was issued by
    pub msp_id: MspId,
}

impl Caller {
    /// Caller belonging to `msp_id`
    pub fn new(msp_id: impl Into<String>) -> Self {
        Self {
            msp_id: MspId::new(msp_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_keys_use_their_own_prefix() {
        assert_eq!(BatchId::new("B1").key().as_str(), "BATCH::B1");
        assert_eq!(OrderId::new("B1").key().as_str(), "ORDER::B1");
        assert_eq!(InvalidationId::new("X").key().as_str(), "INVALIDATION::X");
    }

    #[test]
    fn test_id_validation() {
        assert!(BatchId::new("B1").validate().is_ok());
        assert!(BatchId::new("").validate().is_err());
        assert!(PaymentId::new("P\0").validate().is_err());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&CertId::new("C1")).unwrap();
        assert_eq!(json, "\"C1\"");
        let role: Role = serde_json::from_str("\"inspector\"").unwrap();
        assert_eq!(role, Role::Inspector);
    }
}

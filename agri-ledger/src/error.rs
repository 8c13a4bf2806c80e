//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// The first group are business rejections: every participant validating the
/// same operation against the same state reaches the same one. The rest are
/// infrastructure failures local to one node.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller role not permitted, or caller is not the current owner
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier collision on create
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Requested quantity exceeds what the batch still holds
    #[error("Insufficient quantity: {0}")]
    InsufficientQuantity(String),

    /// Destination organization is not a known participant
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Cross-record foreign-key inconsistency
    #[error("Mismatch: {0}")]
    Mismatch(String),

    /// Operation attempted from a disallowed lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed operation argument (empty id, non-positive quantity, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored value does not decode to the record type its key implies
    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord {
        /// State key holding the value
        key: String,
        /// What went wrong
        reason: String,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record (JSON) serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal envelope (bincode) encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for deterministic rule violations, false for node-local failures
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_)
                | Error::NotFound(_)
                | Error::AlreadyExists(_)
                | Error::InsufficientQuantity(_)
                | Error::InvalidDestination(_)
                | Error::Mismatch(_)
                | Error::InvalidState(_)
                | Error::InvalidArgument(_)
        )
    }

    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InsufficientQuantity(_) => "insufficient_quantity",
            Error::InvalidDestination(_) => "invalid_destination",
            Error::Mismatch(_) => "mismatch",
            Error::InvalidState(_) => "invalid_state",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::CorruptRecord { .. } => "corrupt_record",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Encoding(_) => "encoding",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rejection_split() {
        assert!(Error::NotFound("BATCH::B1".into()).is_business_rejection());
        assert!(Error::InvalidState("released".into()).is_business_rejection());
        assert!(!Error::Storage("disk".into()).is_business_rejection());
        assert!(!Error::Concurrency("closed".into()).is_business_rejection());
    }

    #[test]
    fn test_messages_carry_detail() {
        let err = Error::InsufficientQuantity("requested 70 exceeds available 60".into());
        assert_eq!(
            err.to_string(),
            "Insufficient quantity: requested 70 exceeds available 60"
        );
        assert_eq!(err.kind(), "insufficient_quantity");
    }
}

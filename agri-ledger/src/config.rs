//! Configuration for the ledger

use crate::auth::{AccessPolicy, OrgRegistry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Actor runtime configuration
    pub runtime: RuntimeConfig,

    /// MSP id → role bindings
    pub organizations: OrgRegistry,

    /// Operation → allowed roles
    pub access: AccessPolicy,

    /// Lifecycle rules
    pub lifecycle: LifecycleConfig,

    /// Query configuration
    pub query: QueryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/agri-ledger"),
            service_name: "agri-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            runtime: RuntimeConfig::default(),
            organizations: OrgRegistry::default(),
            access: AccessPolicy::default(),
            lifecycle: LifecycleConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

/// Which substrate backs the world state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable RocksDB store under `data_dir`
    RocksDb,
    /// Process-local store, lost on exit
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub backend: StorageBackend,

    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Actor runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bounded mailbox size (backpressure on submitters)
    pub mailbox_capacity: usize,

    /// Events buffered per subscriber before it starts lagging
    pub event_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            event_channel_capacity: 1024,
        }
    }
}

/// Lifecycle rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Reject verify, transfer and order operations on an INVALIDATED batch
    pub invalidated_is_terminal: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            invalidated_is_terminal: true,
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Answer batch-filtered queries from the secondary index instead of a
    /// full prefix scan
    pub use_secondary_index: bool,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("AGRI_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("AGRI_LEDGER_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "rocksdb" => StorageBackend::RocksDb,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(flag) = std::env::var("AGRI_LEDGER_SECONDARY_INDEX") {
            config.query.use_secondary_index = flag
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid boolean: {}", flag)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> crate::Result<()> {
        if self.runtime.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "runtime.mailbox_capacity must be positive".to_string(),
            ));
        }
        if self.runtime.event_channel_capacity == 0 {
            return Err(crate::Error::Config(
                "runtime.event_channel_capacity must be positive".to_string(),
            ));
        }
        self.organizations.validate()?;
        self.access.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Operation;
    use crate::types::{MspId, Role};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "agri-ledger");
        assert_eq!(config.storage.backend, StorageBackend::RocksDb);
        assert!(config.lifecycle.invalidated_is_terminal);
        assert!(!config.query.use_secondary_index);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            data_dir = "/var/lib/agri"

            [storage]
            backend = "memory"

            [query]
            use_secondary_index = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/agri"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.query.use_secondary_index);
        assert_eq!(config.runtime.mailbox_capacity, 1000);
        assert_eq!(
            config.organizations.role_of(&MspId::new("Org4MSP")),
            Some(Role::Inspector)
        );
    }

    #[test]
    fn test_toml_overrides_access_table() {
        let raw = r#"
            [access]
            create_batch = ["farmer"]
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.access.allows(Operation::CreateBatch, Role::Farmer));
        assert!(!config.access.allows(Operation::CreateBatch, Role::Platform));
        // Untouched operations fall back to the default table
        assert!(config.access.allows(Operation::VerifyBatch, Role::Inspector));
    }

    #[test]
    fn test_verify_batch_stays_with_inspectors() {
        let widened: Config = toml::from_str(
            r#"
            [access]
            verify_batch = ["inspector", "farmer"]
        "#,
        )
        .unwrap();
        assert!(matches!(widened.validate(), Err(crate::Error::Config(_))));

        let replaced: Config = toml::from_str(
            r#"
            [access]
            verify_batch = ["platform"]
        "#,
        )
        .unwrap();
        assert!(matches!(replaced.validate(), Err(crate::Error::Config(_))));

        let restated: Config = toml::from_str(
            r#"
            [access]
            verify_batch = ["inspector"]
        "#,
        )
        .unwrap();
        assert!(restated.validate().is_ok());
    }

    #[test]
    fn test_zero_mailbox_rejected() {
        let mut config = Config::default();
        config.runtime.mailbox_capacity = 0;
        assert!(config.validate().is_err());
    }
}

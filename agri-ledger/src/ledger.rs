//! Main ledger orchestration layer
//!
//! This module ties together the world state, the contract actor, queries
//! and event fan-out into one high-level API.
//!
//! # Example
//!
//! ```no_run
//! use agri_ledger::{Caller, Config, CreateBatchRequest, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> agri_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let batch = ledger
//!         .create_batch(
//!             Caller::new("Org2MSP"),
//!             CreateBatchRequest {
//!                 batch_id: "B1".into(),
//!                 batch_code: "LOT-1".to_string(),
//!                 farmer_id: "farmer-1".to_string(),
//!                 product_id: "maize".to_string(),
//!                 initial_qty_kg: Decimal::from(100),
//!                 harvest_date: "2024-05-30".to_string(),
//!                 meta_hash: "QmMeta".to_string(),
//!             },
//!         )
//!         .await?;
//!     println!("{} kg registered", batch.current_qty_kg);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle, TxReceipt},
    config::StorageBackend,
    contract::{
        CreateBatchRequest, CreateOrderRequest, InvalidateBatchRequest, Invocation,
        LockPaymentRequest, RecordTransferRequest, ReleasePaymentRequest, SupplyChainContract,
        VerifyBatchRequest,
    },
    events::{EmittedEvent, EventBus},
    metrics::Metrics,
    query::{BatchProvenance, ConservationReport, HistoryRecord, KeyedRecord, QueryService},
    records::{Batch, Certificate, Invalidation, LedgerRecord, Order, Payment, Transfer},
    storage::{open_store, StateStore},
    types::{BatchId, Caller, OrderId},
    Config, Error, Result,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for mutating operations
    handle: LedgerHandle,

    /// Direct store access (for reads)
    store: Arc<dyn StateStore>,

    /// Query front end
    queries: QueryService,

    /// Event fan-out
    events: EventBus,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("data_dir", &self.config.data_dir)
            .field("backend", &self.config.storage.backend)
            .finish()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config)?;
        Self::with_store(config, store)
    }

    /// Ledger over a fresh in-memory world state
    pub async fn in_memory() -> Result<Self> {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        Self::open(config).await
    }

    /// Ledger over an already opened store. Must be called inside a Tokio runtime.
    pub fn with_store(config: Config, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        let events = EventBus::new(config.runtime.event_channel_capacity);
        let contract = SupplyChainContract::from_config(&config);

        let handle = spawn_ledger_actor(
            store.clone(),
            contract,
            events.clone(),
            metrics.clone(),
            config.runtime.mailbox_capacity,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            backend = ?config.storage.backend,
            commit_height = store.commit_height()?,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            queries: QueryService::new(store.clone(), config.query.use_secondary_index),
            store,
            events,
            metrics,
            config,
        })
    }

    /// Submit any operation and wait for its commit
    pub async fn submit(&self, caller: Caller, invocation: Invocation) -> Result<TxReceipt> {
        self.handle.submit(caller, invocation).await
    }

    async fn submit_for<T: LedgerRecord>(&self, caller: Caller, invocation: Invocation) -> Result<T> {
        let receipt = self.submit(caller, invocation).await?;
        T::from_record(receipt.record).map_err(|other| Error::CorruptRecord {
            key: other.key().to_string(),
            reason: format!("expected {} receipt but got {}", T::KIND, other.kind()),
        })
    }

    /// `createBatch`
    pub async fn create_batch(&self, caller: Caller, req: CreateBatchRequest) -> Result<Batch> {
        self.submit_for(caller, Invocation::CreateBatch(req)).await
    }

    /// `verifyBatch`
    pub async fn verify_batch(&self, caller: Caller, req: VerifyBatchRequest) -> Result<Certificate> {
        self.submit_for(caller, Invocation::VerifyBatch(req)).await
    }

    /// `recordTransfer`
    pub async fn record_transfer(
        &self,
        caller: Caller,
        req: RecordTransferRequest,
    ) -> Result<Transfer> {
        self.submit_for(caller, Invocation::RecordTransfer(req)).await
    }

    /// `createOrder`
    pub async fn create_order(&self, caller: Caller, req: CreateOrderRequest) -> Result<Order> {
        self.submit_for(caller, Invocation::CreateOrder(req)).await
    }

    /// `lockPayment`
    pub async fn lock_payment(&self, caller: Caller, req: LockPaymentRequest) -> Result<Payment> {
        self.submit_for(caller, Invocation::LockPayment(req)).await
    }

    /// `releasePayment`
    pub async fn release_payment(
        &self,
        caller: Caller,
        req: ReleasePaymentRequest,
    ) -> Result<Payment> {
        self.submit_for(caller, Invocation::ReleasePayment(req)).await
    }

    /// `invalidateBatch`
    pub async fn invalidate_batch(
        &self,
        caller: Caller,
        req: InvalidateBatchRequest,
    ) -> Result<Invalidation> {
        self.submit_for(caller, Invocation::InvalidateBatch(req)).await
    }

    /// Query front end
    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    /// Get batch
    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        self.queries.get_batch(batch_id)
    }

    /// Get any record by key
    pub fn query_by_key(&self, key: &str) -> Result<KeyedRecord> {
        self.queries.query_by_key(key)
    }

    /// Get transfers of a batch
    pub fn get_transfers_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Transfer>> {
        self.queries.get_transfers_for_batch(batch_id)
    }

    /// Get certificates of a batch
    pub fn get_certs_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Certificate>> {
        self.queries.get_certs_for_batch(batch_id)
    }

    /// Get orders of a batch
    pub fn get_orders_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>> {
        self.queries.get_orders_for_batch(batch_id)
    }

    /// Get invalidations of a batch
    pub fn get_invalidations_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Invalidation>> {
        self.queries.get_invalidations_for_batch(batch_id)
    }

    /// Get payments of an order
    pub fn get_payments_for_order(&self, order_id: &OrderId) -> Result<Vec<Payment>> {
        self.queries.get_payments_for_order(order_id)
    }

    /// Key history, oldest first
    pub fn query_history_by_key(&self, key: &str) -> Result<Vec<HistoryRecord>> {
        self.queries.query_history_by_key(key)
    }

    /// Full provenance of a batch
    pub fn get_batch_provenance(&self, batch_id: &BatchId) -> Result<BatchProvenance> {
        self.queries.get_batch_provenance(batch_id)
    }

    /// Check quantity conservation for a batch
    pub fn check_quantity_conservation(&self, batch_id: &BatchId) -> Result<ConservationReport> {
        self.queries.check_quantity_conservation(batch_id)
    }

    /// Number of committed transactions
    pub fn commit_height(&self) -> Result<u64> {
        self.store.commit_height()
    }

    /// Subscribe to committed events
    pub fn subscribe(&self) -> broadcast::Receiver<EmittedEvent> {
        self.events.subscribe()
    }

    /// Subscribe to committed events as a stream
    pub fn subscribe_stream(&self) -> BroadcastStream<EmittedEvent> {
        self.events.subscribe_stream()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

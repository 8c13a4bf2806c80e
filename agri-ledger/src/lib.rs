//! Agricultural Supply-Chain Ledger
//!
//! Shared ledger tracking produce batches from harvest through inspection,
//! custody transfers, orders and escrow payments, across four organizational
//! roles (Farmer, Platform, Middleman, Inspector).
//!
//! # Architecture
//!
//! - **State Machine**: [`SupplyChainContract`] validates and applies every operation
//! - **Single Writer**: One logical writer task serializes all transactions
//! - **Atomic Commits**: One write set per transaction, state + history + index
//! - **Post-Commit Events**: Subscribers only ever see committed changes

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Quantity conservation: Σ(transfers) + Σ(orders) + current == initial
//! - Quantities never go negative and never exceed the registered amount
//! - Deterministic: Same operation on same state → same write set
//! - A payment is locked once and released once

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod keys;
pub mod records;
pub mod storage;
pub mod memory;
pub mod context;
pub mod auth;
pub mod contract;
pub mod events;
pub mod query;
pub mod actor;
pub mod ledger;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    BatchId, Caller, CertId, InvalidationId, MspId, OrderId, PaymentId, Role, TransferId,
};
pub use records::{
    Batch, BatchStatus, Certificate, Invalidation, Order, OrderPaymentState, Payment,
    PaymentStatus, Record, Transfer,
};
pub use contract::{
    CreateBatchRequest, CreateOrderRequest, InvalidateBatchRequest, Invocation,
    LockPaymentRequest, RecordTransferRequest, ReleasePaymentRequest, SupplyChainContract,
    VerifyBatchRequest,
};
pub use events::{ContractEvent, EmittedEvent};
pub use storage::{StateStore, Storage};
pub use memory::MemoryStorage;
pub use actor::TxReceipt;
pub use ledger::Ledger;
pub use config::Config;

//! Supply-chain state machine
//!
//! Every mutating operation follows the same shape:
//!
//! 1. authorize the caller for the operation kind
//! 2. validate arguments
//! 3. load and check the referenced records through the [`TxContext`]
//! 4. stage full-record overwrites on the context
//! 5. set the notification event
//!
//! Operations never touch the store directly and never keep state between
//! calls, so the same operation applied to the same world state yields the
//! same write set on every participant.

mod batch;
mod certificate;
mod order;
mod payment;

pub use batch::{CreateBatchRequest, InvalidateBatchRequest, RecordTransferRequest};
pub use certificate::VerifyBatchRequest;
pub use order::CreateOrderRequest;
pub use payment::{LockPaymentRequest, ReleasePaymentRequest};

use crate::auth::{AuthorizationGuard, Operation};
use crate::config::Config;
use crate::context::TxContext;
use crate::keys::StateKey;
use crate::records::{ensure_storable, Batch, BatchStatus, LedgerRecord, Record};
use crate::types::BatchId;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One contract call as decoded from a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", content = "args", rename_all = "camelCase")]
pub enum Invocation {
    /// `createBatch`
    CreateBatch(CreateBatchRequest),
    /// `verifyBatch`
    VerifyBatch(VerifyBatchRequest),
    /// `recordTransfer`
    RecordTransfer(RecordTransferRequest),
    /// `createOrder`
    CreateOrder(CreateOrderRequest),
    /// `lockPayment`
    LockPayment(LockPaymentRequest),
    /// `releasePayment`
    ReleasePayment(ReleasePaymentRequest),
    /// `invalidateBatch`
    InvalidateBatch(InvalidateBatchRequest),
}

impl Invocation {
    /// Operation kind, for authorization and metrics
    pub fn operation(&self) -> Operation {
        match self {
            Invocation::CreateBatch(_) => Operation::CreateBatch,
            Invocation::VerifyBatch(_) => Operation::VerifyBatch,
            Invocation::RecordTransfer(_) => Operation::RecordTransfer,
            Invocation::CreateOrder(_) => Operation::CreateOrder,
            Invocation::LockPayment(_) => Operation::LockPayment,
            Invocation::ReleasePayment(_) => Operation::ReleasePayment,
            Invocation::InvalidateBatch(_) => Operation::InvalidateBatch,
        }
    }
}

/// The agricultural supply-chain contract
#[derive(Debug, Clone)]
pub struct SupplyChainContract {
    guard: AuthorizationGuard,
    invalidated_is_terminal: bool,
}

impl SupplyChainContract {
    /// Contract with an explicit guard and terminality rule
    pub fn new(guard: AuthorizationGuard, invalidated_is_terminal: bool) -> Self {
        Self {
            guard,
            invalidated_is_terminal,
        }
    }

    /// Contract configured from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            AuthorizationGuard::new(config.access.clone(), config.organizations.clone()),
            config.lifecycle.invalidated_is_terminal,
        )
    }

    /// Guard used for access checks
    pub fn guard(&self) -> &AuthorizationGuard {
        &self.guard
    }

    /// Dispatch one invocation
    pub fn invoke(&self, ctx: &mut TxContext<'_>, invocation: Invocation) -> Result<Record> {
        match invocation {
            Invocation::CreateBatch(req) => self.create_batch(ctx, req).map(Record::Batch),
            Invocation::VerifyBatch(req) => self.verify_batch(ctx, req).map(Record::Cert),
            Invocation::RecordTransfer(req) => {
                self.record_transfer(ctx, req).map(Record::Transfer)
            }
            Invocation::CreateOrder(req) => self.create_order(ctx, req).map(Record::Order),
            Invocation::LockPayment(req) => self.lock_payment(ctx, req).map(Record::Payment),
            Invocation::ReleasePayment(req) => {
                self.release_payment(ctx, req).map(Record::Payment)
            }
            Invocation::InvalidateBatch(req) => {
                self.invalidate_batch(ctx, req).map(Record::Invalidation)
            }
        }
    }

    fn load_batch(&self, ctx: &TxContext<'_>, batch_id: &BatchId) -> Result<Batch> {
        ctx.get_record(&batch_id.key())?
            .ok_or_else(|| Error::NotFound(format!("Batch {} does not exist", batch_id)))
    }

    /// Economic operations are refused once a batch is invalidated
    fn ensure_active(&self, batch: &Batch, operation: Operation) -> Result<()> {
        if self.invalidated_is_terminal && batch.status == BatchStatus::Invalidated {
            return Err(Error::InvalidState(format!(
                "Batch {} is invalidated; {} is not allowed",
                batch.batch_id, operation
            )));
        }
        Ok(())
    }
}

impl Default for SupplyChainContract {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Fail with `AlreadyExists` when `key` is occupied
fn ensure_absent<T: LedgerRecord>(ctx: &TxContext<'_>, key: &StateKey) -> Result<()> {
    if ctx.exists(key)? {
        return Err(Error::AlreadyExists(format!(
            "{} {} already exists",
            T::KIND,
            key.id()
        )));
    }
    Ok(())
}

/// Quantities and amounts are checked against their stored form, so every
/// comparison and subtraction runs on the value that will be persisted.
fn ensure_positive(what: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "{} must be positive, got {}",
            what, value
        )));
    }
    ensure_storable(what, value)
}

fn ensure_non_negative(what: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "{} must not be negative, got {}",
            what, value
        )));
    }
    ensure_storable(what, value)
}

fn ensure_present(what: &str, value: &str) -> Result<()> {
    crate::types::validate_token(what, value)
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared helpers for the per-operation test modules

    use super::*;
    use crate::memory::MemoryStorage;
    use crate::storage::StateStore;
    use crate::types::Caller;
    use chrono::{DateTime, Utc};

    pub const PLATFORM: &str = "Org1MSP";
    pub const FARMER: &str = "Org2MSP";
    pub const MIDDLEMAN: &str = "Org3MSP";
    pub const INSPECTOR: &str = "Org4MSP";

    /// A contract over a memory store, committing every successful call
    pub struct Harness {
        pub contract: SupplyChainContract,
        pub store: MemoryStorage,
        seq: u64,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_contract(SupplyChainContract::default())
        }

        pub fn with_contract(contract: SupplyChainContract) -> Self {
            Self {
                contract,
                store: MemoryStorage::new(),
                seq: 0,
            }
        }

        pub fn call(&mut self, msp: &str, invocation: Invocation) -> Result<Record> {
            self.seq += 1;
            let tx_id = format!("tx-{}", self.seq);
            let timestamp = DateTime::from_timestamp(1_717_200_000 + self.seq as i64, 0)
                .unwrap_or_else(Utc::now);
            let mut ctx = TxContext::new(&self.store, Caller::new(msp), tx_id, timestamp);
            let record = self.contract.invoke(&mut ctx, invocation)?;
            let (batch, _event) = ctx.into_commit();
            self.store.commit(&batch)?;
            Ok(record)
        }

        pub fn batch(&self, id: &str) -> Batch {
            let key = BatchId::new(id).key();
            let bytes = self.store.get_state(&key).unwrap().unwrap();
            Batch::decode(&key, &bytes).unwrap()
        }

        pub fn raw(&self, key: &StateKey) -> Option<Vec<u8>> {
            self.store.get_state(key).unwrap()
        }
    }

    pub fn create_batch(id: &str, qty: i64) -> Invocation {
        create_batch_kg(id, Decimal::from(qty))
    }

    pub fn create_batch_kg(id: &str, qty: Decimal) -> Invocation {
        Invocation::CreateBatch(CreateBatchRequest {
            batch_id: BatchId::new(id),
            batch_code: format!("LOT-{}", id),
            farmer_id: "farmer-1".to_string(),
            product_id: "maize".to_string(),
            initial_qty_kg: qty,
            harvest_date: "2024-05-30".to_string(),
            meta_hash: "QmMeta".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_wire_format() {
        let raw = r#"{
            "function": "createBatch",
            "args": {
                "batchId": "B1",
                "batchCode": "LOT-1",
                "farmerId": "farmer-1",
                "productId": "maize",
                "initialQtyKg": "100",
                "harvestDate": "2024-05-30",
                "metaHash": "QmMeta"
            }
        }"#;
        let invocation: Invocation = serde_json::from_str(raw).unwrap();
        assert_eq!(invocation.operation(), Operation::CreateBatch);
        match invocation {
            Invocation::CreateBatch(req) => {
                assert_eq!(req.initial_qty_kg, Decimal::from(100));
            }
            other => panic!("unexpected invocation {:?}", other),
        }

        let release: Invocation = serde_json::from_str(
            r#"{"function": "releasePayment", "args": {"paymentId": "P1"}}"#,
        )
        .unwrap();
        assert_eq!(release.operation(), Operation::ReleasePayment);
    }

    #[test]
    fn test_amount_guards() {
        assert!(ensure_positive("qty", Decimal::from(1)).is_ok());
        assert!(ensure_positive("qty", Decimal::ZERO).is_err());
        assert!(ensure_non_negative("price", Decimal::ZERO).is_ok());
        assert!(ensure_non_negative("price", Decimal::from(-1)).is_err());
        assert!(ensure_positive("qty", Decimal::new(25, 1)).is_ok());
        assert!(matches!(
            ensure_positive("qty", Decimal::new(1, 9)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(ensure_non_negative("price", Decimal::MAX).is_err());
    }
}

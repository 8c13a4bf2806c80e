//! Contract events
//!
//! Each successful operation sets one event on its transaction context. The
//! runtime publishes it on a broadcast channel after the write set commits.
//! Delivery is best effort: a publish with no subscribers, or a subscriber
//! that lags behind and loses events, never affects the operation.

use crate::types::{BatchId, CertId, MspId, OrderId, PaymentId, TransferId};
use crate::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// State-change notification; serializes to the bare payload document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ContractEvent {
    /// `BatchCreated`
    BatchCreated {
        /// Batch
        batch_id: BatchId,
        /// Registering farmer
        farmer_id: String,
        /// Product
        product_id: String,
        /// Registered quantity
        #[serde(with = "rust_decimal::serde::float")]
        initial_qty_kg: Decimal,
        /// Transaction
        tx_id: String,
    },
    /// `BatchVerified`
    BatchVerified {
        /// Batch
        batch_id: BatchId,
        /// Issued certificate
        cert_id: CertId,
        /// Certificate type
        cert_type: String,
        /// Inspector
        issuer_id: String,
        /// Transaction
        tx_id: String,
    },
    /// `TransferRecorded`
    TransferRecorded {
        /// Transfer
        transfer_id: TransferId,
        /// Batch
        batch_id: BatchId,
        /// Previous owner organization
        from_org: MspId,
        /// New owner organization
        to_org: MspId,
        /// Quantity moved
        #[serde(with = "rust_decimal::serde::float")]
        quantity_kg: Decimal,
        /// Transaction
        tx_id: String,
    },
    /// `OrderCreated`
    OrderCreated {
        /// Order
        order_id: OrderId,
        /// Batch
        batch_id: BatchId,
        /// Buyer
        buyer_id: String,
        /// Reserved quantity
        #[serde(with = "rust_decimal::serde::float")]
        qty_kg: Decimal,
        /// Order total
        #[serde(with = "rust_decimal::serde::float")]
        total_amount: Decimal,
        /// Transaction
        tx_id: String,
    },
    /// `PaymentLocked`
    PaymentLocked {
        /// Payment
        payment_id: PaymentId,
        /// Order
        order_id: OrderId,
        /// Escrowed amount
        #[serde(with = "rust_decimal::serde::float")]
        amount: Decimal,
        /// Currency
        currency: String,
        /// Transaction
        tx_id: String,
    },
    /// `PaymentReleased`
    PaymentReleased {
        /// Payment
        payment_id: PaymentId,
        /// Order
        order_id: OrderId,
        /// Released amount
        #[serde(with = "rust_decimal::serde::float")]
        amount: Decimal,
        /// Transaction
        tx_id: String,
    },
    /// `BatchInvalidated`
    BatchInvalidated {
        /// Batch
        batch_id: BatchId,
        /// Reason given
        reason: String,
        /// Issuing organization
        issued_by_org: MspId,
        /// Transaction
        tx_id: String,
    },
}

impl ContractEvent {
    /// Event name as seen by subscribers
    pub fn name(&self) -> &'static str {
        match self {
            ContractEvent::BatchCreated { .. } => "BatchCreated",
            ContractEvent::BatchVerified { .. } => "BatchVerified",
            ContractEvent::TransferRecorded { .. } => "TransferRecorded",
            ContractEvent::OrderCreated { .. } => "OrderCreated",
            ContractEvent::PaymentLocked { .. } => "PaymentLocked",
            ContractEvent::PaymentReleased { .. } => "PaymentReleased",
            ContractEvent::BatchInvalidated { .. } => "BatchInvalidated",
        }
    }

    /// JSON payload bytes
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An event published after its transaction committed
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Committed transaction
    pub tx_id: String,
    /// Commit sequence number of that transaction
    pub commit_seq: u64,
    /// The event
    pub event: ContractEvent,
}

/// Post-commit output channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EmittedEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire and forget; returns the number of subscribers reached
    pub fn publish(&self, emitted: EmittedEvent) -> usize {
        let name = emitted.event.name();
        match self.sender.send(emitted) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "No subscribers for event");
                0
            }
        }
    }

    /// New subscriber; sees only events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EmittedEvent> {
        self.sender.subscribe()
    }

    /// New subscriber as a `Stream`
    pub fn subscribe_stream(&self) -> BroadcastStream<EmittedEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

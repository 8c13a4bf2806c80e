//! Ledger records
//!
//! All records are stored as self-describing JSON documents tagged with an
//! `objectType` discriminator. Field names and numeric encodings match the
//! documents already written by earlier deployments of the network, so the
//! camelCase names and float-encoded quantities are part of the wire format.
//!
//! [`Record`] is the only decoding entry point. Typed loads go through
//! [`LedgerRecord::from_record`], which matches it exhaustively; a key that
//! holds the wrong record type is reported as corrupt instead of being read
//! field by field.

use crate::keys::{RecordKind, StateKey};
use crate::types::{
    BatchId, CertId, InvalidationId, MspId, OrderId, PaymentId, TransferId,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unit every batch quantity is expressed in
pub const UNIT_KG: &str = "KG";

fn default_unit() -> String {
    UNIT_KG.to_string()
}

/// Decimal places a stored quantity or amount may carry
pub const MAX_FRACTION_DIGITS: u32 = 6;

/// Stored quantities and amounts stay below `10^MAX_INTEGER_DIGITS`
pub const MAX_INTEGER_DIGITS: u32 = 9;

/// One float-encoded field, as it appears inside a stored document
#[derive(Serialize, Deserialize)]
struct FloatField(#[serde(with = "rust_decimal::serde::float")] Decimal);

/// Fail with `InvalidArgument` unless `value` reads back from its stored
/// float encoding unchanged.
///
/// Quantities and amounts are persisted as JSON numbers, so only values of at
/// most fifteen significant digits survive a write. Keeping every value inside
/// `MAX_INTEGER_DIGITS` integer and `MAX_FRACTION_DIGITS` fractional digits
/// also keeps sums and differences of such values storable.
pub fn ensure_storable(what: &str, value: Decimal) -> Result<()> {
    let unstorable = |detail: &str| -> Result<()> {
        Err(Error::InvalidArgument(format!(
            "{} {} cannot be stored exactly: {}",
            what, value, detail
        )))
    };

    if value.normalize().scale() > MAX_FRACTION_DIGITS {
        return unstorable(&format!(
            "more than {} decimal places",
            MAX_FRACTION_DIGITS
        ));
    }
    if value.abs() >= Decimal::from(10u64.pow(MAX_INTEGER_DIGITS)) {
        return unstorable(&format!("more than {} integer digits", MAX_INTEGER_DIGITS));
    }

    let encoded = match serde_json::to_vec(&FloatField(value)) {
        Ok(encoded) => encoded,
        Err(e) => return unstorable(&e.to_string()),
    };
    match serde_json::from_slice::<FloatField>(&encoded) {
        Ok(FloatField(stored)) if stored == value => Ok(()),
        Ok(FloatField(stored)) => unstorable(&format!("reads back as {}", stored)),
        Err(e) => unstorable(&e.to_string()),
    }
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Registered, not yet inspected
    Pending,
    /// At least one certificate issued
    Verified,
    /// Custody moved at least once
    Transferred,
    /// Recalled or flagged as fraudulent (terminal)
    Invalidated,
}

impl BatchStatus {
    /// Position in the forward-only lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            BatchStatus::Pending => 0,
            BatchStatus::Verified => 1,
            BatchStatus::Transferred => 2,
            BatchStatus::Invalidated => 3,
        }
    }

    /// Status after advancing to `next`; never moves backwards
    pub fn advance(self, next: BatchStatus) -> BatchStatus {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

/// Escrow progress as seen from the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPaymentState {
    /// No payment locked yet
    Init,
    /// Payment held in escrow
    Locked,
    /// Payment released to the seller
    Released,
}

/// Delivery progress. No operation advances it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    /// Awaiting delivery
    Pending,
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Held in escrow
    Locked,
    /// Released (terminal)
    Released,
}

/// A physical lot of produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch ID
    pub batch_id: BatchId,
    /// Human-facing lot code
    pub batch_code: String,
    /// Organization that registered the batch
    pub farmer_org: MspId,
    /// Farmer identity within that organization
    pub farmer_id: String,
    /// Product identifier
    pub product_id: String,
    /// Quantity at registration, fixed
    #[serde(with = "rust_decimal::serde::float")]
    pub initial_qty_kg: Decimal,
    /// Quantity still available, never increases
    #[serde(with = "rust_decimal::serde::float")]
    pub current_qty_kg: Decimal,
    /// Always `KG`
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Harvest date as supplied by the farmer
    pub harvest_date: String,
    /// Content hash of off-ledger metadata
    pub meta_hash: String,
    /// Reserved for split/merge lineage, always `None`
    pub parent_batch_id: Option<BatchId>,
    /// Current custodian organization
    pub current_owner_org: MspId,
    /// Current custodian identity
    pub current_owner_id: String,
    /// Creation time (transaction timestamp)
    pub created_at: DateTime<Utc>,
    /// Last transaction that wrote this batch
    pub last_tx: String,
}

impl Batch {
    /// True when `(org, id)` is the current custodian
    pub fn is_owned_by(&self, org: &MspId, id: &str) -> bool {
        &self.current_owner_org == org && self.current_owner_id == id
    }
}

/// Inspection certificate bound to one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Certificate ID
    pub cert_id: CertId,
    /// Certified batch
    pub batch_id: BatchId,
    /// Issuing (inspector) organization
    pub issuer_org: MspId,
    /// Issuing inspector
    pub issuer_id: String,
    /// Certificate type (organic, grade, ...)
    pub cert_type: String,
    /// Hash of the certificate document
    pub cert_hash: String,
    /// Content id of the certificate metadata
    #[serde(rename = "certMetaCID")]
    pub cert_meta_cid: String,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Issuing transaction
    pub tx_id: String,
}

/// Immutable custody-change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Transfer ID
    pub transfer_id: TransferId,
    /// Transferred batch
    pub batch_id: BatchId,
    /// Previous custodian organization
    pub from_org: MspId,
    /// Previous custodian identity
    pub from_id: String,
    /// New custodian organization
    pub to_org: MspId,
    /// New custodian identity
    pub to_id: String,
    /// Quantity moved
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity_kg: Decimal,
    /// Hash of the hand-over location
    pub location_hash: String,
    /// Transfer time
    pub timestamp: DateTime<Utc>,
    /// Recording transaction
    pub tx_id: String,
}

/// Reservation of batch quantity against a buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order ID
    pub order_id: OrderId,
    /// Batch the quantity is reserved from
    pub batch_id: BatchId,
    /// Seller organization (owner snapshot at creation)
    pub seller_org: MspId,
    /// Seller identity (owner snapshot at creation)
    pub seller_id: String,
    /// Buyer identity
    pub buyer_id: String,
    /// Reserved quantity
    #[serde(with = "rust_decimal::serde::float")]
    pub qty_kg: Decimal,
    /// Unit price
    #[serde(with = "rust_decimal::serde::float")]
    pub price_per_unit: Decimal,
    /// Total order amount
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    /// Escrow progress
    pub payment_state: OrderPaymentState,
    /// Delivery progress
    pub delivery_state: DeliveryState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Creating transaction
    pub tx_id: String,
}

/// Escrow record bound to one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Payment ID
    pub payment_id: PaymentId,
    /// Paid order
    pub order_id: OrderId,
    /// Batch of the paid order
    pub batch_id: BatchId,
    /// Amount held
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Currency code, free-form
    pub currency: String,
    /// Paying party
    pub payer: String,
    /// Receiving party
    pub payee: String,
    /// Escrow status
    pub status: PaymentStatus,
    /// Hash of the off-ledger payment proof
    pub proof_hash: String,
    /// Last transaction that wrote this payment
    pub tx_id: String,
    /// Lock time
    pub timestamp: DateTime<Utc>,
}

/// Terminal recall / fraud record bound to one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    /// Invalidation ID (stored as `id`)
    #[serde(rename = "id", alias = "invalidationId")]
    pub invalidation_id: InvalidationId,
    /// Invalidated batch
    pub batch_id: BatchId,
    /// Free-text reason
    pub reason: String,
    /// Issuing organization
    pub issued_by_org: MspId,
    /// Issuing identity
    pub issued_by_id: String,
    /// Issue time
    pub timestamp: DateTime<Utc>,
    /// Issuing transaction
    pub tx_id: String,
}

/// Any record, tagged by `objectType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum Record {
    /// `BATCH`
    #[serde(rename = "BATCH")]
    Batch(Batch),
    /// `CERT`
    #[serde(rename = "CERT")]
    Cert(Certificate),
    /// `TRANSFER`
    #[serde(rename = "TRANSFER")]
    Transfer(Transfer),
    /// `ORDER`
    #[serde(rename = "ORDER")]
    Order(Order),
    /// `PAYMENT`
    #[serde(rename = "PAYMENT")]
    Payment(Payment),
    /// `INVALIDATION`
    #[serde(rename = "INVALIDATION")]
    Invalidation(Invalidation),
}

impl Record {
    /// Record kind
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Batch(_) => RecordKind::Batch,
            Record::Cert(_) => RecordKind::Cert,
            Record::Transfer(_) => RecordKind::Transfer,
            Record::Order(_) => RecordKind::Order,
            Record::Payment(_) => RecordKind::Payment,
            Record::Invalidation(_) => RecordKind::Invalidation,
        }
    }

    /// Key this record is stored under
    pub fn key(&self) -> StateKey {
        match self {
            Record::Batch(r) => r.key(),
            Record::Cert(r) => r.key(),
            Record::Transfer(r) => r.key(),
            Record::Order(r) => r.key(),
            Record::Payment(r) => r.key(),
            Record::Invalidation(r) => r.key(),
        }
    }

    /// Serialize to the stored JSON document
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the value stored at `key`, checking the tag against the prefix
    pub fn decode(key: &StateKey, bytes: &[u8]) -> Result<Record> {
        let record: Record = serde_json::from_slice(bytes).map_err(|e| Error::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if record.kind() != key.kind() {
            return Err(Error::CorruptRecord {
                key: key.to_string(),
                reason: format!("holds a {} record", record.kind()),
            });
        }
        Ok(record)
    }
}

/// A record type with a fixed kind and key
pub trait LedgerRecord: Clone + Sized {
    /// Kind of every value of this type
    const KIND: RecordKind;

    /// Key this record is stored under
    fn key(&self) -> StateKey;

    /// Parent id the secondary index groups this record under, if any
    fn index_parent(&self) -> Option<&str>;

    /// Wrap in the tagged enum
    fn into_record(self) -> Record;

    /// Unwrap from the tagged enum, handing back any other variant
    fn from_record(record: Record) -> std::result::Result<Self, Record>;

    /// Decode the value stored at `key` as this type
    fn decode(key: &StateKey, bytes: &[u8]) -> Result<Self> {
        Self::from_record(Record::decode(key, bytes)?).map_err(|other| Error::CorruptRecord {
            key: key.to_string(),
            reason: format!("expected {} but found {}", Self::KIND, other.kind()),
        })
    }
}

impl LedgerRecord for Batch {
    const KIND: RecordKind = RecordKind::Batch;

    fn key(&self) -> StateKey {
        self.batch_id.key()
    }

    fn index_parent(&self) -> Option<&str> {
        None
    }

    fn into_record(self) -> Record {
        Record::Batch(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Batch(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl LedgerRecord for Certificate {
    const KIND: RecordKind = RecordKind::Cert;

    fn key(&self) -> StateKey {
        self.cert_id.key()
    }

    fn index_parent(&self) -> Option<&str> {
        Some(self.batch_id.as_str())
    }

    fn into_record(self) -> Record {
        Record::Cert(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Cert(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl LedgerRecord for Transfer {
    const KIND: RecordKind = RecordKind::Transfer;

    fn key(&self) -> StateKey {
        self.transfer_id.key()
    }

    fn index_parent(&self) -> Option<&str> {
        Some(self.batch_id.as_str())
    }

    fn into_record(self) -> Record {
        Record::Transfer(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Transfer(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl LedgerRecord for Order {
    const KIND: RecordKind = RecordKind::Order;

    fn key(&self) -> StateKey {
        self.order_id.key()
    }

    fn index_parent(&self) -> Option<&str> {
        Some(self.batch_id.as_str())
    }

    fn into_record(self) -> Record {
        Record::Order(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Order(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl LedgerRecord for Payment {
    const KIND: RecordKind = RecordKind::Payment;

    fn key(&self) -> StateKey {
        self.payment_id.key()
    }

    // Payments group under their order, not the batch
    fn index_parent(&self) -> Option<&str> {
        Some(self.order_id.as_str())
    }

    fn into_record(self) -> Record {
        Record::Payment(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Payment(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl LedgerRecord for Invalidation {
    const KIND: RecordKind = RecordKind::Invalidation;

    fn key(&self) -> StateKey {
        self.invalidation_id.key()
    }

    fn index_parent(&self) -> Option<&str> {
        Some(self.batch_id.as_str())
    }

    fn into_record(self) -> Record {
        Record::Invalidation(self)
    }

    fn from_record(record: Record) -> std::result::Result<Self, Record> {
        match record {
            Record::Invalidation(r) => Ok(r),
            other => Err(other),
        }
    }
}

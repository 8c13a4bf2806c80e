//! Read-only queries over committed state
//!
//! Queries never go through the writer; they read whatever the store has
//! committed at the time of the call. Filtered lookups either scan the whole
//! type prefix and filter on the parent id, or read the secondary index
//! written alongside every commit. Both paths return the same records in the
//! same (key) order.

use crate::keys::{index_prefix, StateKey};
use crate::records::{Batch, Certificate, Invalidation, LedgerRecord, Order, Payment, Record, Transfer};
use crate::storage::StateStore;
use crate::types::{BatchId, OrderId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// Result of `queryByKey`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedRecord {
    /// Requested key
    #[serde(rename = "Key")]
    pub key: String,
    /// Record stored there
    #[serde(rename = "Record")]
    pub record: Record,
}

/// One committed version of a key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Writing transaction
    pub tx_id: String,
    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,
    /// Commit sequence number
    pub commit_seq: u64,
    /// Record as written
    pub record: Record,
}

/// Everything the ledger knows about one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProvenance {
    /// Current batch record
    pub batch: Batch,
    /// Certificates issued for it
    pub certificates: Vec<Certificate>,
    /// Custody transfers
    pub transfers: Vec<Transfer>,
    /// Orders reserved against it
    pub orders: Vec<Order>,
    /// Recall / fraud records
    pub invalidations: Vec<Invalidation>,
    /// Every committed version of the batch record, oldest first
    pub history: Vec<HistoryRecord>,
}

/// Quantity accounting for one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConservationReport {
    /// Batch
    pub batch_id: BatchId,
    /// Registered quantity
    pub initial_qty_kg: Decimal,
    /// Quantity still on the batch
    pub current_qty_kg: Decimal,
    /// Sum of all transfers
    pub transferred_qty_kg: Decimal,
    /// Sum of all orders
    pub ordered_qty_kg: Decimal,
}

impl ConservationReport {
    /// Quantity accounted for by transfers, orders and what is left
    pub fn accounted_qty_kg(&self) -> Decimal {
        self.transferred_qty_kg + self.ordered_qty_kg + self.current_qty_kg
    }

    /// True when no quantity was created or lost
    pub fn holds(&self) -> bool {
        self.accounted_qty_kg() == self.initial_qty_kg
            && self.current_qty_kg >= Decimal::ZERO
            && self.current_qty_kg <= self.initial_qty_kg
    }
}

/// Query front end over a state store
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn StateStore>,
    use_secondary_index: bool,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("use_secondary_index", &self.use_secondary_index)
            .finish()
    }
}

impl QueryService {
    /// Queries over `store`
    pub fn new(store: Arc<dyn StateStore>, use_secondary_index: bool) -> Self {
        Self {
            store,
            use_secondary_index,
        }
    }

    /// `getBatch`
    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        let key = batch_id.key();
        let bytes = self
            .store
            .get_state(&key)?
            .ok_or_else(|| Error::NotFound(format!("Batch {} does not exist", batch_id)))?;
        Batch::decode(&key, &bytes)
    }

    /// `queryByKey`: any record by its full key
    pub fn query_by_key(&self, raw_key: &str) -> Result<KeyedRecord> {
        let key = StateKey::parse(raw_key)?;
        let bytes = self
            .store
            .get_state(&key)?
            .ok_or_else(|| Error::NotFound(format!("Key {} does not exist", key)))?;
        Ok(KeyedRecord {
            key: key.to_string(),
            record: Record::decode(&key, &bytes)?,
        })
    }

    /// `getTransfersForBatch`
    pub fn get_transfers_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Transfer>> {
        self.children_of(batch_id.as_str())
    }

    /// `getCertsForBatch`
    pub fn get_certs_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Certificate>> {
        self.children_of(batch_id.as_str())
    }

    /// `getOrdersForBatch`
    pub fn get_orders_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>> {
        self.children_of(batch_id.as_str())
    }

    /// `getInvalidationsForBatch`
    pub fn get_invalidations_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Invalidation>> {
        self.children_of(batch_id.as_str())
    }

    /// `getPaymentsForOrder`
    pub fn get_payments_for_order(&self, order_id: &OrderId) -> Result<Vec<Payment>> {
        self.children_of(order_id.as_str())
    }

    /// `queryHistoryByKey`: every committed version, oldest first
    pub fn query_history_by_key(&self, raw_key: &str) -> Result<Vec<HistoryRecord>> {
        let key = StateKey::parse(raw_key)?;
        self.history_of(&key)
    }

    /// `getBatchProvenance`
    pub fn get_batch_provenance(&self, batch_id: &BatchId) -> Result<BatchProvenance> {
        let batch = self.get_batch(batch_id)?;
        Ok(BatchProvenance {
            certificates: self.get_certs_for_batch(batch_id)?,
            transfers: self.get_transfers_for_batch(batch_id)?,
            orders: self.get_orders_for_batch(batch_id)?,
            invalidations: self.get_invalidations_for_batch(batch_id)?,
            history: self.history_of(&batch_id.key())?,
            batch,
        })
    }

    /// `checkQuantityConservation`
    pub fn check_quantity_conservation(&self, batch_id: &BatchId) -> Result<ConservationReport> {
        let batch = self.get_batch(batch_id)?;
        let transferred_qty_kg: Decimal = self
            .get_transfers_for_batch(batch_id)?
            .iter()
            .map(|t| t.quantity_kg)
            .sum();
        let ordered_qty_kg: Decimal = self
            .get_orders_for_batch(batch_id)?
            .iter()
            .map(|o| o.qty_kg)
            .sum();

        let report = ConservationReport {
            batch_id: batch.batch_id,
            initial_qty_kg: batch.initial_qty_kg,
            current_qty_kg: batch.current_qty_kg,
            transferred_qty_kg,
            ordered_qty_kg,
        };
        if !report.holds() {
            tracing::error!(
                batch_id = %report.batch_id,
                initial = %report.initial_qty_kg,
                accounted = %report.accounted_qty_kg(),
                "Quantity conservation violated"
            );
        }
        Ok(report)
    }

    fn history_of(&self, key: &StateKey) -> Result<Vec<HistoryRecord>> {
        self.store
            .get_history_for_key(key)?
            .into_iter()
            .map(|entry| {
                Ok(HistoryRecord {
                    record: Record::decode(key, &entry.value)?,
                    tx_id: entry.tx_id,
                    timestamp: entry.timestamp,
                    commit_seq: entry.commit_seq,
                })
            })
            .collect()
    }

    fn children_of<T: LedgerRecord>(&self, parent: &str) -> Result<Vec<T>> {
        if self.use_secondary_index {
            self.children_by_index(parent)
        } else {
            self.children_by_scan(parent)
        }
    }

    fn children_by_scan<T: LedgerRecord>(&self, parent: &str) -> Result<Vec<T>> {
        let (start, end) = T::KIND.key_range();
        let mut out = Vec::new();
        for (raw_key, bytes) in self.store.get_state_by_range(&start, &end)? {
            let key = StateKey::parse(&raw_key)?;
            let record = T::decode(&key, &bytes)?;
            if record.index_parent() == Some(parent) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn children_by_index<T: LedgerRecord>(&self, parent: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for key in self.store.scan_index(&index_prefix(T::KIND, parent))? {
            // Index entries are written in the same commit as the record
            let bytes = self.store.get_state(&key)?.ok_or_else(|| Error::CorruptRecord {
                key: key.to_string(),
                reason: "indexed record is missing".to_string(),
            })?;
            out.push(T::decode(&key, &bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TxContext;
    use crate::contract::{
        CreateBatchRequest, CreateOrderRequest, Invocation, RecordTransferRequest,
        SupplyChainContract, VerifyBatchRequest,
    };
    use crate::memory::MemoryStorage;
    use crate::types::{Caller, CertId, MspId, TransferId};

    struct Fixture {
        store: Arc<MemoryStorage>,
        contract: SupplyChainContract,
        seq: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStorage::new()),
                contract: SupplyChainContract::default(),
                seq: 0,
            }
        }

        fn call(&mut self, msp: &str, invocation: Invocation) {
            self.seq += 1;
            let mut ctx = TxContext::new(
                self.store.as_ref(),
                Caller::new(msp),
                format!("tx-{}", self.seq),
                Utc::now(),
            );
            self.contract.invoke(&mut ctx, invocation).unwrap();
            let (batch, _) = ctx.into_commit();
            self.store.commit(&batch).unwrap();
        }

        fn queries(&self, use_index: bool) -> QueryService {
            QueryService::new(self.store.clone(), use_index)
        }
    }

    fn create(id: &str, qty: i64) -> Invocation {
        Invocation::CreateBatch(CreateBatchRequest {
            batch_id: BatchId::new(id),
            batch_code: id.to_string(),
            farmer_id: "farmer-1".to_string(),
            product_id: "rice".to_string(),
            initial_qty_kg: Decimal::from(qty),
            harvest_date: "2024-05-30".to_string(),
            meta_hash: "m".to_string(),
        })
    }

    fn transfer(id: &str, batch: &str, from_org_id: &str, to_org: &str, to_id: &str, qty: i64) -> Invocation {
        Invocation::RecordTransfer(RecordTransferRequest {
            transfer_id: TransferId::new(id),
            batch_id: BatchId::new(batch),
            from_id: from_org_id.to_string(),
            to_org: MspId::new(to_org),
            to_id: to_id.to_string(),
            quantity_kg: Decimal::from(qty),
            location_hash: "loc".to_string(),
        })
    }

    fn order(id: &str, batch: &str, qty: i64) -> Invocation {
        Invocation::CreateOrder(CreateOrderRequest {
            order_id: OrderId::new(id),
            batch_id: BatchId::new(batch),
            buyer_id: "buyer".to_string(),
            qty_kg: Decimal::from(qty),
            price_per_unit: Decimal::ONE,
            total_amount: Decimal::from(qty),
        })
    }

    /// Two batches with interleaved children
    fn populated() -> Fixture {
        let mut f = Fixture::new();
        f.call("Org2MSP", create("B1", 100));
        f.call("Org2MSP", create("B10", 50));
        f.call("Org2MSP", transfer("T2", "B1", "farmer-1", "Org2MSP", "farmer-1", 10));
        f.call("Org2MSP", transfer("T1", "B10", "farmer-1", "Org3MSP", "mm-1", 5));
        f.call("Org2MSP", transfer("T3", "B1", "farmer-1", "Org3MSP", "mm-1", 20));
        f.call("Org3MSP", order("O1", "B1", 15));
        f.call(
            "Org4MSP",
            Invocation::VerifyBatch(VerifyBatchRequest {
                batch_id: BatchId::new("B1"),
                cert_id: CertId::new("C1"),
                issuer_id: "insp".to_string(),
                cert_type: "GRADE_A".to_string(),
                cert_hash: "h".to_string(),
                cert_meta_cid: "cid".to_string(),
            }),
        );
        f
    }

    #[test]
    fn test_transfers_filtered_and_ordered() {
        let f = populated();
        let ids: Vec<String> = f
            .queries(false)
            .get_transfers_for_batch(&BatchId::new("B1"))
            .unwrap()
            .into_iter()
            .map(|t| t.transfer_id.to_string())
            .collect();
        assert_eq!(ids, vec!["T2", "T3"]);

        let none = f
            .queries(false)
            .get_transfers_for_batch(&BatchId::new("B404"))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_index_and_scan_agree() {
        let f = populated();
        let scan = f.queries(false);
        let index = f.queries(true);
        for batch in ["B1", "B10", "B404"] {
            let id = BatchId::new(batch);
            assert_eq!(
                scan.get_transfers_for_batch(&id).unwrap(),
                index.get_transfers_for_batch(&id).unwrap()
            );
            assert_eq!(
                scan.get_certs_for_batch(&id).unwrap(),
                index.get_certs_for_batch(&id).unwrap()
            );
            assert_eq!(
                scan.get_orders_for_batch(&id).unwrap(),
                index.get_orders_for_batch(&id).unwrap()
            );
        }
    }

    #[test]
    fn test_query_by_key() {
        let f = populated();
        let q = f.queries(false);

        let found = q.query_by_key("CERT::C1").unwrap();
        assert_eq!(found.key, "CERT::C1");
        assert!(matches!(found.record, Record::Cert(_)));

        let doc = serde_json::to_value(&found).unwrap();
        assert_eq!(doc["Key"], "CERT::C1");
        assert_eq!(doc["Record"]["objectType"], "CERT");

        assert!(matches!(q.query_by_key("CERT::C9"), Err(Error::NotFound(_))));
        assert!(matches!(q.query_by_key("WIDGET::1"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_history_oldest_first() {
        let f = populated();
        let history = f.queries(false).query_history_by_key("BATCH::B1").unwrap();
        let txs: Vec<&str> = history.iter().map(|h| h.tx_id.as_str()).collect();
        assert_eq!(txs, vec!["tx-1", "tx-3", "tx-5", "tx-6", "tx-7"]);
        match &history[0].record {
            Record::Batch(b) => assert_eq!(b.current_qty_kg, Decimal::from(100)),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_provenance_and_conservation() {
        let f = populated();
        let q = f.queries(true);

        let prov = q.get_batch_provenance(&BatchId::new("B1")).unwrap();
        assert_eq!(prov.transfers.len(), 2);
        assert_eq!(prov.orders.len(), 1);
        assert_eq!(prov.certificates.len(), 1);
        assert!(prov.invalidations.is_empty());
        assert_eq!(prov.history.len(), 5);

        let report = q.check_quantity_conservation(&BatchId::new("B1")).unwrap();
        assert_eq!(report.current_qty_kg, Decimal::from(55));
        assert_eq!(report.transferred_qty_kg, Decimal::from(30));
        assert_eq!(report.ordered_qty_kg, Decimal::from(15));
        assert!(report.holds());

        assert!(matches!(
            q.check_quantity_conservation(&BatchId::new("B404")),
            Err(Error::NotFound(_))
        ));
    }
}

//! Batch registration, custody transfer and invalidation

use super::{ensure_absent, ensure_positive, ensure_present, SupplyChainContract};
use crate::auth::Operation;
use crate::context::TxContext;
use crate::events::ContractEvent;
use crate::records::{ensure_storable, Batch, BatchStatus, Invalidation, Transfer, UNIT_KG};
use crate::types::{BatchId, InvalidationId, MspId, TransferId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Arguments of `createBatch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    /// New batch id
    pub batch_id: BatchId,
    /// Lot code
    pub batch_code: String,
    /// Farmer identity; becomes the first owner
    pub farmer_id: String,
    /// Product
    pub product_id: String,
    /// Harvested quantity
    pub initial_qty_kg: Decimal,
    /// Harvest date
    pub harvest_date: String,
    /// Hash of off-ledger metadata
    pub meta_hash: String,
}

/// Arguments of `recordTransfer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTransferRequest {
    /// New transfer id
    pub transfer_id: TransferId,
    /// Batch being moved
    pub batch_id: BatchId,
    /// Caller's identity; must be the current owner
    pub from_id: String,
    /// Destination organization
    pub to_org: MspId,
    /// Destination identity
    pub to_id: String,
    /// Quantity to move
    pub quantity_kg: Decimal,
    /// Hash of the hand-over location
    pub location_hash: String,
}

/// Arguments of `invalidateBatch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateBatchRequest {
    /// New invalidation id
    pub invalidation_id: InvalidationId,
    /// Batch to invalidate
    pub batch_id: BatchId,
    /// Reason (recall, fraud, ...)
    pub reason: String,
    /// Issuing identity
    pub issued_by_id: String,
}

impl SupplyChainContract {
    /// Register a new batch owned by the caller's organization
    pub fn create_batch(&self, ctx: &mut TxContext<'_>, req: CreateBatchRequest) -> Result<Batch> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::CreateBatch, &caller)?;

        req.batch_id.validate()?;
        ensure_present("farmerId", &req.farmer_id)?;
        ensure_positive("initialQtyKg", req.initial_qty_kg)?;
        ensure_absent::<Batch>(ctx, &req.batch_id.key())?;

        let batch = Batch {
            batch_id: req.batch_id,
            batch_code: req.batch_code,
            farmer_org: caller.msp_id.clone(),
            farmer_id: req.farmer_id.clone(),
            product_id: req.product_id,
            initial_qty_kg: req.initial_qty_kg,
            current_qty_kg: req.initial_qty_kg,
            unit: UNIT_KG.to_string(),
            status: BatchStatus::Pending,
            harvest_date: req.harvest_date,
            meta_hash: req.meta_hash,
            parent_batch_id: None,
            current_owner_org: caller.msp_id,
            current_owner_id: req.farmer_id,
            created_at: ctx.tx_timestamp(),
            last_tx: ctx.tx_id().to_string(),
        };
        ctx.put_record(&batch)?;

        ctx.set_event(ContractEvent::BatchCreated {
            batch_id: batch.batch_id.clone(),
            farmer_id: batch.farmer_id.clone(),
            product_id: batch.product_id.clone(),
            initial_qty_kg: batch.initial_qty_kg,
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(batch_id = %batch.batch_id, qty = %batch.initial_qty_kg, "Batch created");
        Ok(batch)
    }

    /// Move `quantity_kg` of a batch, and its ownership, to another organization
    pub fn record_transfer(
        &self,
        ctx: &mut TxContext<'_>,
        req: RecordTransferRequest,
    ) -> Result<Transfer> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::RecordTransfer, &caller)?;

        req.transfer_id.validate()?;
        req.batch_id.validate()?;
        ensure_present("toId", &req.to_id)?;
        ensure_positive("quantityKg", req.quantity_kg)?;

        let mut batch = self.load_batch(ctx, &req.batch_id)?;

        if !batch.is_owned_by(&caller.msp_id, &req.from_id) {
            return Err(Error::Unauthorized(format!(
                "Only current owner can transfer. Current owner: {}:{}",
                batch.current_owner_org, batch.current_owner_id
            )));
        }

        self.ensure_active(&batch, Operation::RecordTransfer)?;

        if req.quantity_kg > batch.current_qty_kg {
            return Err(Error::InsufficientQuantity(format!(
                "Transfer quantity {} exceeds available quantity {}",
                req.quantity_kg, batch.current_qty_kg
            )));
        }

        if !self.guard.registry().is_known(&req.to_org) {
            return Err(Error::InvalidDestination(format!(
                "Invalid destination organization: {}",
                req.to_org
            )));
        }

        ensure_absent::<Transfer>(ctx, &req.transfer_id.key())?;

        let transfer = Transfer {
            transfer_id: req.transfer_id,
            batch_id: req.batch_id,
            from_org: caller.msp_id,
            from_id: req.from_id,
            to_org: req.to_org,
            to_id: req.to_id,
            quantity_kg: req.quantity_kg,
            location_hash: req.location_hash,
            timestamp: ctx.tx_timestamp(),
            tx_id: ctx.tx_id().to_string(),
        };

        batch.current_qty_kg -= transfer.quantity_kg;
        ensure_storable("currentQtyKg", batch.current_qty_kg)?;
        batch.current_owner_org = transfer.to_org.clone();
        batch.current_owner_id = transfer.to_id.clone();
        batch.status = batch.status.advance(BatchStatus::Transferred);
        batch.last_tx = ctx.tx_id().to_string();

        ctx.put_record(&transfer)?;
        ctx.put_record(&batch)?;

        ctx.set_event(ContractEvent::TransferRecorded {
            transfer_id: transfer.transfer_id.clone(),
            batch_id: transfer.batch_id.clone(),
            from_org: transfer.from_org.clone(),
            to_org: transfer.to_org.clone(),
            quantity_kg: transfer.quantity_kg,
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(
            transfer_id = %transfer.transfer_id,
            batch_id = %transfer.batch_id,
            remaining = %batch.current_qty_kg,
            "Transfer recorded"
        );
        Ok(transfer)
    }

    /// Record a recall / fraud finding and mark the batch INVALIDATED
    pub fn invalidate_batch(
        &self,
        ctx: &mut TxContext<'_>,
        req: InvalidateBatchRequest,
    ) -> Result<Invalidation> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::InvalidateBatch, &caller)?;

        req.invalidation_id.validate()?;
        req.batch_id.validate()?;

        let mut batch = self.load_batch(ctx, &req.batch_id)?;
        ensure_absent::<Invalidation>(ctx, &req.invalidation_id.key())?;

        let invalidation = Invalidation {
            invalidation_id: req.invalidation_id,
            batch_id: req.batch_id,
            reason: req.reason,
            issued_by_org: caller.msp_id,
            issued_by_id: req.issued_by_id,
            timestamp: ctx.tx_timestamp(),
            tx_id: ctx.tx_id().to_string(),
        };

        batch.status = BatchStatus::Invalidated;
        batch.last_tx = ctx.tx_id().to_string();

        ctx.put_record(&invalidation)?;
        ctx.put_record(&batch)?;

        ctx.set_event(ContractEvent::BatchInvalidated {
            batch_id: invalidation.batch_id.clone(),
            reason: invalidation.reason.clone(),
            issued_by_org: invalidation.issued_by_org.clone(),
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(batch_id = %invalidation.batch_id, "Batch invalidated");
        Ok(invalidation)
    }
}

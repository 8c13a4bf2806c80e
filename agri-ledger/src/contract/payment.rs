//! Escrow payments
//!
//! A payment is locked against an order once, then released once. The order
//! mirrors the payment's progress in its `paymentState`.

use super::{ensure_absent, ensure_non_negative, ensure_present, SupplyChainContract};
use crate::auth::Operation;
use crate::context::TxContext;
use crate::events::ContractEvent;
use crate::records::{Order, OrderPaymentState, Payment, PaymentStatus};
use crate::types::{BatchId, OrderId, PaymentId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Arguments of `lockPayment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPaymentRequest {
    /// New payment id
    pub payment_id: PaymentId,
    /// Order being paid
    pub order_id: OrderId,
    /// Batch the order was placed against
    pub batch_id: BatchId,
    /// Escrowed amount
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// Paying party
    pub payer: String,
    /// Receiving party
    pub payee: String,
    /// Hash of the off-ledger payment proof
    pub proof_hash: String,
}

/// Arguments of `releasePayment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePaymentRequest {
    /// Payment to release
    pub payment_id: PaymentId,
}

impl SupplyChainContract {
    /// Lock an escrow payment for an order still in `INIT`
    pub fn lock_payment(&self, ctx: &mut TxContext<'_>, req: LockPaymentRequest) -> Result<Payment> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::LockPayment, &caller)?;

        req.payment_id.validate()?;
        req.order_id.validate()?;
        req.batch_id.validate()?;
        ensure_present("currency", &req.currency)?;
        ensure_non_negative("amount", req.amount)?;

        let mut order: Order = ctx
            .get_record(&req.order_id.key())?
            .ok_or_else(|| Error::NotFound(format!("Order {} does not exist", req.order_id)))?;

        if order.batch_id != req.batch_id {
            return Err(Error::Mismatch(format!(
                "Order {} is not for batch {}",
                req.order_id, req.batch_id
            )));
        }

        ensure_absent::<Payment>(ctx, &req.payment_id.key())?;

        if order.payment_state != OrderPaymentState::Init {
            return Err(Error::InvalidState(format!(
                "Order {} already has a payment ({:?})",
                order.order_id, order.payment_state
            )));
        }

        let payment = Payment {
            payment_id: req.payment_id,
            order_id: req.order_id,
            batch_id: req.batch_id,
            amount: req.amount,
            currency: req.currency,
            payer: req.payer,
            payee: req.payee,
            status: PaymentStatus::Locked,
            proof_hash: req.proof_hash,
            tx_id: ctx.tx_id().to_string(),
            timestamp: ctx.tx_timestamp(),
        };

        order.payment_state = OrderPaymentState::Locked;

        ctx.put_record(&payment)?;
        ctx.put_record(&order)?;

        ctx.set_event(ContractEvent::PaymentLocked {
            payment_id: payment.payment_id.clone(),
            order_id: payment.order_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(payment_id = %payment.payment_id, order_id = %payment.order_id, "Payment locked");
        Ok(payment)
    }

    /// Release a LOCKED payment and mark its order RELEASED
    pub fn release_payment(
        &self,
        ctx: &mut TxContext<'_>,
        req: ReleasePaymentRequest,
    ) -> Result<Payment> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::ReleasePayment, &caller)?;

        req.payment_id.validate()?;

        let mut payment: Payment = ctx
            .get_record(&req.payment_id.key())?
            .ok_or_else(|| Error::NotFound(format!("Payment {} does not exist", req.payment_id)))?;

        if payment.status != PaymentStatus::Locked {
            return Err(Error::InvalidState(format!(
                "Payment {} is not in LOCKED state",
                payment.payment_id
            )));
        }

        payment.status = PaymentStatus::Released;
        payment.tx_id = ctx.tx_id().to_string();
        ctx.put_record(&payment)?;

        match ctx.get_record::<Order>(&payment.order_id.key())? {
            Some(mut order) => {
                order.payment_state = OrderPaymentState::Released;
                ctx.put_record(&order)?;
            }
            None => {
                tracing::warn!(
                    payment_id = %payment.payment_id,
                    order_id = %payment.order_id,
                    "Released payment references a missing order"
                );
            }
        }

        ctx.set_event(ContractEvent::PaymentReleased {
            payment_id: payment.payment_id.clone(),
            order_id: payment.order_id.clone(),
            amount: payment.amount,
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(payment_id = %payment.payment_id, "Payment released");
        Ok(payment)
    }
}

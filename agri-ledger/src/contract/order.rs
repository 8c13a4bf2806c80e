//! Purchase orders

use super::{ensure_absent, ensure_non_negative, ensure_positive, ensure_present, SupplyChainContract};
use crate::auth::Operation;
use crate::context::TxContext;
use crate::events::ContractEvent;
use crate::records::{ensure_storable, DeliveryState, Order, OrderPaymentState};
use crate::types::{BatchId, OrderId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Arguments of `createOrder`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// New order id
    pub order_id: OrderId,
    /// Batch to reserve from
    pub batch_id: BatchId,
    /// Buyer identity
    pub buyer_id: String,
    /// Quantity to reserve
    pub qty_kg: Decimal,
    /// Unit price
    pub price_per_unit: Decimal,
    /// Order total, as agreed off-ledger
    pub total_amount: Decimal,
}

impl SupplyChainContract {
    /// Reserve quantity from a batch against a buyer.
    ///
    /// The reserved quantity leaves the batch immediately. `total_amount` is
    /// recorded as given and not checked against `qty_kg * price_per_unit`.
    pub fn create_order(&self, ctx: &mut TxContext<'_>, req: CreateOrderRequest) -> Result<Order> {
        let caller = ctx.caller().clone();
        self.guard.authorize(Operation::CreateOrder, &caller)?;

        req.order_id.validate()?;
        req.batch_id.validate()?;
        ensure_present("buyerId", &req.buyer_id)?;
        ensure_positive("qtyKg", req.qty_kg)?;
        ensure_non_negative("pricePerUnit", req.price_per_unit)?;
        ensure_non_negative("totalAmount", req.total_amount)?;

        let mut batch = self.load_batch(ctx, &req.batch_id)?;
        ensure_absent::<Order>(ctx, &req.order_id.key())?;
        self.ensure_active(&batch, Operation::CreateOrder)?;

        if req.qty_kg > batch.current_qty_kg {
            return Err(Error::InsufficientQuantity(format!(
                "Order quantity {} exceeds available quantity {}",
                req.qty_kg, batch.current_qty_kg
            )));
        }

        let order = Order {
            order_id: req.order_id,
            batch_id: req.batch_id,
            seller_org: batch.current_owner_org.clone(),
            seller_id: batch.current_owner_id.clone(),
            buyer_id: req.buyer_id,
            qty_kg: req.qty_kg,
            price_per_unit: req.price_per_unit,
            total_amount: req.total_amount,
            payment_state: OrderPaymentState::Init,
            delivery_state: DeliveryState::Pending,
            created_at: ctx.tx_timestamp(),
            tx_id: ctx.tx_id().to_string(),
        };

        batch.current_qty_kg -= order.qty_kg;
        ensure_storable("currentQtyKg", batch.current_qty_kg)?;
        batch.last_tx = ctx.tx_id().to_string();

        ctx.put_record(&order)?;
        ctx.put_record(&batch)?;

        ctx.set_event(ContractEvent::OrderCreated {
            order_id: order.order_id.clone(),
            batch_id: order.batch_id.clone(),
            buyer_id: order.buyer_id.clone(),
            qty_kg: order.qty_kg,
            total_amount: order.total_amount,
            tx_id: ctx.tx_id().to_string(),
        });

        tracing::debug!(
            order_id = %order.order_id,
            batch_id = %order.batch_id,
            remaining = %batch.current_qty_kg,
            "Order created"
        );
        Ok(order)
    }
}

//! Variant stock and the goods-receipt reconciler.

use serde::Serialize;
use tracing::{debug, info, warn};

use stitchline_core::{
    backorder::allocate_receipt, ids::*, Actor, AuditAction, BackorderStatus, Role, Variant,
};
use stitchline_storage::{Storage, StorageError};

use crate::error::EngineError;
use crate::{audit, load_order, record_actor, Engine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoodsReceipt {
    pub variant_id: VariantId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptLine {
    pub variant_id: VariantId,
    pub sku: String,
    pub received: u32,
    pub fulfilled: Vec<PurchaseRequestId>,
    /// Units handed straight to pending requests.
    pub consumed: u32,
    pub stock_after: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptReport {
    pub lines: Vec<ReceiptLine>,
    /// Orders whose last pending request was completed by this receipt.
    pub orders_arrived: Vec<OrderId>,
}

impl Engine {
    pub fn register_variant(&mut self, sku: &str, stock: u32) -> Result<VariantId, EngineError> {
        let sku = sku.trim();
        if sku.is_empty() {
            return Err(EngineError::Validation("sku is required".into()));
        }
        let variant = Variant {
            id: VariantId::new(),
            sku: sku.to_string(),
            stock: i64::from(stock),
        };
        let tx = self.storage.begin()?;
        tx.insert_variant(&variant).map_err(|e| match e {
            StorageError::ConstraintViolation(msg) => EngineError::Validation(msg),
            other => other.into(),
        })?;
        tx.commit()?;
        debug!(variant_id = %variant.id, sku, stock, "variant registered");
        Ok(variant.id)
    }

    pub fn variant_stock(&self, variant_id: VariantId) -> Result<i64, EngineError> {
        self.storage
            .get_variant(variant_id)?
            .map(|v| v.stock)
            .ok_or_else(|| EngineError::Validation(format!("unknown variant {variant_id}")))
    }

    /// Books a batch of received goods and settles pending purchase requests
    /// for each variant oldest first. Runs as one transaction.
    pub fn receive_goods(
        &mut self,
        actor: &Actor,
        receipts: &[GoodsReceipt],
    ) -> Result<ReceiptReport, EngineError> {
        if !matches!(actor.role, Role::Stock | Role::Purchasing) && !actor.role.is_admin() {
            warn!(actor = %actor.id, role = %actor.role, "goods receipt denied");
            return Err(EngineError::Unauthorized { action: "receiveGoods" });
        }
        if receipts.is_empty() {
            return Err(EngineError::Validation("a receipt needs at least one line".into()));
        }
        if let Some(line) = receipts.iter().find(|r| r.quantity == 0) {
            return Err(EngineError::Validation(format!(
                "zero quantity received for {}",
                line.variant_id
            )));
        }

        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        record_actor(&tx, actor, now)?;

        let mut report = ReceiptReport::default();
        let mut touched: Vec<OrderId> = Vec::new();
        for receipt in receipts {
            let variant = tx.get_variant(receipt.variant_id)?.ok_or_else(|| {
                EngineError::Validation(format!("unknown variant {}", receipt.variant_id))
            })?;
            tx.add_stock(variant.id, receipt.quantity)?;

            let pending = tx.pending_requests_for_variant(variant.id)?;
            let allocation = allocate_receipt(receipt.quantity, &pending);
            for request_id in &allocation.fulfilled {
                if !tx.complete_request(*request_id, now)? {
                    return Err(EngineError::stale(request_id));
                }
                if let Some(request) = pending.iter().find(|r| r.id == *request_id) {
                    if !touched.contains(&request.order_id) {
                        touched.push(request.order_id);
                    }
                }
            }
            if allocation.consumed > 0 && !tx.consume_stock(variant.id, allocation.consumed)? {
                return Err(EngineError::stale(&variant.sku));
            }

            let stock_after = tx
                .get_variant(variant.id)?
                .map(|v| v.stock)
                .unwrap_or_default();
            debug!(
                sku = %variant.sku,
                received = receipt.quantity,
                consumed = allocation.consumed,
                fulfilled = allocation.fulfilled.len(),
                "receipt line booked"
            );
            report.lines.push(ReceiptLine {
                variant_id: variant.id,
                sku: variant.sku,
                received: receipt.quantity,
                fulfilled: allocation.fulfilled,
                consumed: allocation.consumed,
                stock_after,
            });
        }

        let summary = report
            .lines
            .iter()
            .map(|l| format!("{} x{}", l.sku, l.received))
            .collect::<Vec<_>>()
            .join(", ");
        audit(&tx, &mut outbox, None, Some(actor.id), AuditAction::GoodsReceived, summary, now)?;

        for order_id in touched {
            if tx.count_pending_requests(order_id)? > 0 {
                continue;
            }
            let order = load_order(&tx, order_id)?;
            if !order.backorder.status.is_pending() {
                continue;
            }
            if !tx.advance_backorder(order_id, order.backorder.status, BackorderStatus::Arrived)? {
                return Err(EngineError::stale(&order.job_code));
            }
            audit(
                &tx,
                &mut outbox,
                Some(&order),
                None,
                AuditAction::BackorderFulfilled,
                "all backordered items received",
                now,
            )?;
            report.orders_arrived.push(order_id);
        }
        tx.commit()?;

        info!(
            actor = %actor.id,
            lines = report.lines.len(),
            orders_arrived = report.orders_arrived.len(),
            "goods received"
        );
        self.dispatch(outbox);
        Ok(report)
    }
}

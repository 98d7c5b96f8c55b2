//! Payment recording and history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use stitchline_core::{
    ledger::{self, PaymentRequest},
    ids::*,
    Actor, AuditAction, Capability, OrderView, PaymentEntry, PaymentMethod, PaymentStatus,
};
use stitchline_storage::Storage;

use crate::error::EngineError;
use crate::{audit, ensure_visible, load_order, non_blank, record_actor, require, Engine};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub order: OrderView,
    pub entry: PaymentEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLine {
    /// `None` for the synthesized legacy deposit row.
    pub payment_id: Option<PaymentId>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub evidence_ref: Option<String>,
    pub note: Option<String>,
    pub uploaded_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentHistory {
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// Newest first; a legacy deposit, if any, comes last.
    pub lines: Vec<PaymentLine>,
}

impl Engine {
    /// Appends a payment entry and re-derives the paid amount from the ledger.
    pub fn record_payment(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        request: PaymentRequest,
    ) -> Result<PaymentOutcome, EngineError> {
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        require(&order, actor, Capability::RecordPayment)?;
        if let Err(rejection) = ledger::validate_payment(&order.financials, &request) {
            warn!(order_id = %order_id, job_code = %order.job_code, reason = %rejection, "payment rejected");
            return Err(rejection.into());
        }
        record_actor(&tx, actor, now)?;

        let entry = PaymentEntry {
            id: PaymentId::new(),
            order_id,
            amount: request.amount,
            method: request.method,
            evidence_ref: non_blank(request.evidence_ref.as_deref()).map(str::to_string),
            note: non_blank(request.note.as_deref()).map(str::to_string),
            uploaded_by: actor.id,
            created_at: now,
        };
        tx.insert_payment(&entry)?;

        let entries = tx.payments_for_order(order_id)?;
        let mut financials = ledger::apply_payment(&order.financials, &request)?;
        financials.paid_amount =
            ledger::fold_paid(order.financials.legacy_deposit, entries.iter().map(|e| e.amount))?;
        tx.update_financials(order_id, &financials, now)?;

        let action = match request.method {
            PaymentMethod::Transfer => AuditAction::PaymentRecorded,
            PaymentMethod::CashOnDelivery => AuditAction::CodDeclared,
        };
        let detail = format!(
            "{} via {}, balance {}",
            entry.amount,
            entry.method,
            financials.balance_due()
        );
        audit(&tx, &mut outbox, Some(&order), Some(actor.id), action, detail, now)?;
        tx.commit()?;

        info!(
            order_id = %order_id,
            job_code = %order.job_code,
            amount = %entry.amount,
            method = %entry.method,
            status = %financials.payment_status(),
            "payment recorded"
        );
        self.dispatch(outbox);
        Ok(PaymentOutcome {
            order: self.reload_view(order_id, actor)?,
            entry,
        })
    }

    pub fn payment_history(&self, actor: &Actor, order_id: OrderId) -> Result<PaymentHistory, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        ensure_visible(&order, actor)?;
        require(&order, actor, Capability::ViewFinancial)?;

        let mut lines: Vec<PaymentLine> = self
            .storage
            .payments_for_order(order_id)?
            .into_iter()
            .map(|e| PaymentLine {
                payment_id: Some(e.id),
                amount: e.amount,
                method: e.method,
                evidence_ref: e.evidence_ref,
                note: e.note,
                uploaded_by: Some(e.uploaded_by),
                created_at: e.created_at,
            })
            .collect();
        let f = &order.financials;
        if f.legacy_deposit > Decimal::ZERO {
            lines.push(PaymentLine {
                payment_id: None,
                amount: f.legacy_deposit,
                method: f.payment_method,
                evidence_ref: None,
                note: Some("deposit recorded at order creation".into()),
                uploaded_by: None,
                created_at: order.created_at,
            });
        }
        Ok(PaymentHistory {
            total_price: f.total_price,
            paid_amount: f.paid_amount,
            balance_due: f.balance_due(),
            payment_status: f.payment_status(),
            payment_method: f.payment_method,
            lines,
        })
    }
}

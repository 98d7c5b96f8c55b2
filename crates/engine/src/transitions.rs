//! Claims, workflow transitions and the production scan trigger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use stitchline_core::{
    capability::claimable_slot, ids::*, Actor, AuditAction, Capability, Department, Edge, Order,
    OrderStatus, OrderView, PaymentMethod, Role,
};
use stitchline_storage::StoreTx;

use crate::error::EngineError;
use crate::{audit, facts, load_order, non_blank, record_actor, require, Engine, Notification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target: OrderStatus,
    pub reason: Option<String>,
    pub tracking_no: Option<String>,
    /// Status the caller last saw. A mismatch fails with `STALE_STATE`
    /// instead of being judged against the graph.
    pub expected_from: Option<OrderStatus>,
}

impl TransitionRequest {
    pub fn to(target: OrderStatus) -> Self {
        Self {
            target,
            reason: None,
            tracking_no: None,
            expected_from: None,
        }
    }

    pub fn expecting(mut self, status: OrderStatus) -> Self {
        self.expected_from = Some(status);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tracking(mut self, tracking_no: impl Into<String>) -> Self {
        self.tracking_no = Some(tracking_no.into());
        self
    }
}

/// Outcome of a failed quality check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcFailure {
    pub return_to: Department,
    pub reason: String,
    /// Pieces found damaged in this inspection.
    pub damaged: u32,
    /// The fault traces back to how the order was taken.
    pub sales_error: bool,
}

impl QcFailure {
    pub fn new(return_to: Department, reason: impl Into<String>) -> Self {
        Self {
            return_to,
            reason: reason.into(),
            damaged: 0,
            sales_error: false,
        }
    }

    pub fn with_damaged(mut self, count: u32) -> Self {
        self.damaged = count;
        self
    }

    pub fn sales_error(mut self) -> Self {
        self.sales_error = true;
        self
    }

    fn detail_suffix(&self) -> String {
        match (self.damaged, self.sales_error) {
            (0, false) => String::new(),
            (0, true) => " (sales error)".into(),
            (n, false) => format!(" (damaged {n})"),
            (n, true) => format!(" (damaged {n}, sales error)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanKind {
    Start,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub order: OrderView,
    /// False when the scan repeated an already-recorded step.
    pub advanced: bool,
}

/// Status write plus the side effects of entering the edge's target.
fn apply_edge(
    tx: &StoreTx<'_>,
    order: &Order,
    edge: Edge,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let target = edge.target();
    if !tx.update_status(order.id, order.status, target, now)? {
        warn!(order_id = %order.id, job_code = %order.job_code, "status changed underneath transition");
        return Err(EngineError::stale(&order.job_code));
    }
    if let Some(department) = edge.claims_slot() {
        if order.assignees.slot(department).is_none()
            && actor.role.department() == Some(department)
            && !tx.claim_slot(order.id, department, actor.id, target, now)?
        {
            return Err(EngineError::stale(&order.job_code));
        }
    }
    match target {
        OrderStatus::InProduction => {
            tx.set_production_started(order.id, now)?;
        }
        OrderStatus::ProductionFinished => {
            tx.set_production_completed(order.id, now)?;
        }
        _ => {}
    }
    Ok(())
}

/// System reminder written when finished goods wait on an unpaid transfer
/// balance. COD orders settle at the door and get none.
fn remind_payment(
    tx: &StoreTx<'_>,
    outbox: &mut Vec<Notification>,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let balance = order.financials.balance_due();
    if balance <= Decimal::ZERO || order.financials.payment_method == PaymentMethod::CashOnDelivery {
        return Ok(());
    }
    debug!(order_id = %order.id, job_code = %order.job_code, balance = %balance, "payment reminder");
    audit(
        tx,
        outbox,
        Some(order),
        None,
        AuditAction::PaymentReminder,
        format!("production finished with {balance} outstanding"),
        now,
    )
}

/// Edge taken implicitly when a department claims in its entry status.
fn claim_advance(department: Department, status: OrderStatus) -> Option<Edge> {
    match (department, status) {
        (Department::Graphic, OrderStatus::PendingArtwork) => Some(Edge::StartDesign),
        (Department::Production, OrderStatus::StockRechecked) => Some(Edge::StartProduction),
        _ => None,
    }
}

impl Engine {
    /// Takes the caller's department slot. Claiming a slot the caller
    /// already holds changes nothing.
    pub fn claim(&mut self, actor: &Actor, order_id: OrderId) -> Result<OrderView, EngineError> {
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        require(&order, actor, Capability::Claim)?;
        let department = claimable_slot(&facts(&order), actor)
            .ok_or_else(|| EngineError::denied(Capability::Claim))?;
        if order.assignees.owns(department, actor.id) {
            drop(tx);
            return self.reload_view(order_id, actor);
        }
        record_actor(&tx, actor, now)?;
        if !tx.claim_slot(order_id, department, actor.id, order.status, now)? {
            return Err(EngineError::stale(&order.job_code));
        }

        let mut detail = format!("claimed for {}", department.label());
        if let Some(edge) = claim_advance(department, order.status) {
            let target = edge.target();
            if !tx.update_status(order_id, order.status, target, now)? {
                return Err(EngineError::stale(&order.job_code));
            }
            if target == OrderStatus::InProduction {
                tx.set_production_started(order_id, now)?;
            }
            detail.push_str(&format!(", {} -> {}", order.status, target));
        }
        audit(&tx, &mut outbox, Some(&order), Some(actor.id), AuditAction::TaskClaimed, detail, now)?;
        tx.commit()?;

        info!(
            order_id = %order_id,
            job_code = %order.job_code,
            actor = %actor.id,
            department = %department,
            "task claimed"
        );
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }

    /// Moves the order along one edge of the workflow graph.
    pub fn transition(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        request: TransitionRequest,
    ) -> Result<OrderView, EngineError> {
        self.step(actor, order_id, request, None)
    }

    fn step(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        request: TransitionRequest,
        qc: Option<&QcFailure>,
    ) -> Result<OrderView, EngineError> {
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        let from = order.status;
        if request.expected_from.is_some_and(|seen| seen != from) {
            warn!(order_id = %order_id, job_code = %order.job_code, from = %from, "transition based on an outdated status");
            return Err(EngineError::stale(&order.job_code));
        }
        let edge = Edge::between(from, request.target).ok_or_else(|| {
            warn!(order_id = %order_id, from = %from, to = %request.target, "transition not in graph");
            EngineError::InvalidTransition {
                from,
                to: request.target,
            }
        })?;
        require(&order, actor, edge.required_capability())?;

        let reason = non_blank(request.reason.as_deref());
        if edge.requires_reason() && reason.is_none() {
            return Err(EngineError::Validation(format!(
                "a reason is required to move to {}",
                request.target
            )));
        }
        let tracking = if edge == Edge::Ship {
            if !order.financials.clears_shipment() {
                warn!(
                    order_id = %order_id,
                    job_code = %order.job_code,
                    balance = %order.financials.balance_due(),
                    "shipment blocked by outstanding balance"
                );
                return Err(EngineError::PaymentIncomplete {
                    balance: order.financials.balance_due(),
                });
            }
            Some(non_blank(request.tracking_no.as_deref()).ok_or(EngineError::TrackingRequired)?)
        } else {
            None
        };

        record_actor(&tx, actor, now)?;
        apply_edge(&tx, &order, edge, actor, now)?;
        if let Some(tracking) = tracking {
            tx.set_tracking(order_id, tracking)?;
        }
        if edge.is_qc_failure() {
            tx.record_qc_failure(order_id, qc.map_or(0, |q| q.damaged))?;
        }

        let (action, detail) = match edge {
            Edge::Cancel => (AuditAction::OrderCancelled, format!("cancelled from {from}: {}", reason.unwrap_or_default())),
            e if e.is_qc_failure() => (
                AuditAction::QcFailed,
                format!(
                    "returned to {}: {}{}",
                    edge.target(),
                    reason.unwrap_or_default(),
                    qc.map(QcFailure::detail_suffix).unwrap_or_default()
                ),
            ),
            _ => {
                let mut detail = format!("{from} -> {}", edge.target());
                if let Some(tracking) = tracking {
                    detail.push_str(&format!(" (tracking {tracking})"));
                }
                (AuditAction::StatusChanged, detail)
            }
        };
        audit(&tx, &mut outbox, Some(&order), Some(actor.id), action, detail, now)?;
        if edge.target() == OrderStatus::ProductionFinished {
            remind_payment(&tx, &mut outbox, &order, now)?;
        }
        tx.commit()?;

        info!(
            order_id = %order_id,
            job_code = %order.job_code,
            actor = %actor.id,
            from = %from,
            to = %edge.target(),
            "order transitioned"
        );
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }

    /// QC failure: sends the order back to graphic or production and adds
    /// to its rejection and damage counts.
    pub fn fail_qc(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        failure: QcFailure,
    ) -> Result<OrderView, EngineError> {
        let return_to = failure.return_to;
        let edge = Edge::qc_return(return_to).ok_or_else(|| {
            EngineError::Validation(format!("QC cannot return an order to {return_to}"))
        })?;
        let request = TransitionRequest::to(edge.target()).with_reason(failure.reason.clone());
        self.step(actor, order_id, request, Some(&failure))
    }

    pub fn cancel(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<OrderView, EngineError> {
        self.transition(
            actor,
            order_id,
            TransitionRequest::to(OrderStatus::Cancelled).with_reason(reason),
        )
    }

    /// Automated production scan. The first scan of each kind moves the
    /// order; repeats are recorded without touching the set-once timestamps.
    pub fn production_scan(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        kind: ScanKind,
    ) -> Result<ScanOutcome, EngineError> {
        use OrderStatus::*;
        let (entry, after) = match kind {
            ScanKind::Start => (StockRechecked, &[InProduction, ProductionFinished][..]),
            ScanKind::Complete => (InProduction, &[ProductionFinished][..]),
        };

        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        let advanced = if order.status == entry {
            let edge = match kind {
                ScanKind::Start => Edge::StartProduction,
                ScanKind::Complete => Edge::FinishProduction,
            };
            require(&order, actor, edge.required_capability())?;
            record_actor(&tx, actor, now)?;
            apply_edge(&tx, &order, edge, actor, now)?;
            audit(
                &tx,
                &mut outbox,
                Some(&order),
                Some(actor.id),
                AuditAction::ProductionScan,
                format!("{kind:?} scan: {} -> {}", order.status, edge.target()),
                now,
            )?;
            if edge == Edge::FinishProduction {
                remind_payment(&tx, &mut outbox, &order, now)?;
            }
            true
        } else if after.contains(&order.status) {
            if !(actor.role == Role::Production || actor.role.is_admin()) {
                warn!(order_id = %order_id, actor = %actor.id, role = %actor.role, "scan denied");
                return Err(EngineError::Unauthorized { action: "productionScan" });
            }
            record_actor(&tx, actor, now)?;
            tx.touch(order_id, now)?;
            audit(
                &tx,
                &mut outbox,
                Some(&order),
                Some(actor.id),
                AuditAction::ProductionScan,
                format!("{kind:?} scan repeated at {}", order.status),
                now,
            )?;
            false
        } else {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: after[0],
            });
        };
        tx.commit()?;

        info!(order_id = %order_id, job_code = %order.job_code, kind = ?kind, advanced, "production scan");
        self.dispatch(outbox);
        Ok(ScanOutcome {
            order: self.reload_view(order_id, actor)?,
            advanced,
        })
    }

    /// Administrative override that empties a department slot.
    pub fn release_claim(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        department: Department,
    ) -> Result<OrderView, EngineError> {
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        require(&order, actor, Capability::ReleaseClaim)?;
        record_actor(&tx, actor, now)?;
        let previous = tx.release_slot(order_id, department, now)?.ok_or_else(|| {
            EngineError::Validation(format!("{} slot is not claimed", department.label()))
        })?;
        audit(
            &tx,
            &mut outbox,
            Some(&order),
            Some(actor.id),
            AuditAction::ClaimReleased,
            format!("{} released from {}", department.label(), previous.short()),
            now,
        )?;
        tx.commit()?;
        info!(order_id = %order_id, job_code = %order.job_code, department = %department, "claim released");
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }
}

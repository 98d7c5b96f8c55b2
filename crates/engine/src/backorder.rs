//! Purchasing updates to an order's backorder sub-state.

use chrono::NaiveDate;
use tracing::{debug, info};

use stitchline_core::{
    backorder::{self, BackorderRejection},
    ids::*,
    Actor, AuditAction, BackorderStatus, Capability, OrderView,
};

use crate::error::EngineError;
use crate::{audit, load_order, non_blank, record_actor, require, Engine};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackorderUpdate {
    pub eta: Option<NaiveDate>,
    pub reason: Option<String>,
    pub confirm_arrival: bool,
}

impl BackorderUpdate {
    pub fn eta(eta: NaiveDate) -> Self {
        Self {
            eta: Some(eta),
            ..Self::default()
        }
    }

    pub fn arrived() -> Self {
        Self {
            confirm_arrival: true,
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Engine {
    /// Sets or revises the expected arrival, records a delay reason, or
    /// confirms that the goods are in.
    pub fn update_backorder_info(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        update: BackorderUpdate,
    ) -> Result<OrderView, EngineError> {
        let reason = non_blank(update.reason.as_deref()).map(str::to_string);
        if update.eta.is_none() && reason.is_none() && !update.confirm_arrival {
            return Err(EngineError::Validation("nothing to update".into()));
        }
        let now = self.now();
        let today = self.clock().today();
        let max_revisions = self.config().max_eta_revisions;
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        if update.eta.is_some() || reason.is_some() {
            require(&order, actor, Capability::EditBackorder)?;
        }
        if update.confirm_arrival {
            require(&order, actor, Capability::ConfirmArrival)?;
        }

        let mut state = order.backorder.clone();
        let mut changes = Vec::new();
        if let Some(eta) = update.eta {
            if let Some(next) = backorder::apply_eta(&state, eta, today, max_revisions)? {
                changes.push(if state.eta.is_some() {
                    format!("eta revised to {eta}")
                } else {
                    format!("eta set to {eta}")
                });
                state = next;
            }
        }
        if let Some(reason) = reason {
            changes.push(format!("reason: {reason}"));
            state.reason = Some(reason);
        }
        let action = if update.confirm_arrival {
            if state.status == BackorderStatus::Arrived {
                return Err(BackorderRejection::AlreadyArrived.into());
            }
            state.status = BackorderStatus::Arrived;
            changes.push("arrival confirmed".into());
            AuditAction::BackorderArrived
        } else {
            AuditAction::BackorderUpdated
        };

        if state == order.backorder {
            debug!(order_id = %order_id, "backorder update changed nothing");
            drop(tx);
            return self.reload_view(order_id, actor);
        }
        record_actor(&tx, actor, now)?;
        tx.set_backorder(order_id, &state, now)?;
        audit(&tx, &mut outbox, Some(&order), Some(actor.id), action, changes.join("; "), now)?;
        tx.commit()?;

        info!(
            order_id = %order_id,
            job_code = %order.job_code,
            actor = %actor.id,
            status = %state.status,
            revisions = state.eta_revisions,
            "backorder updated"
        );
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }
}

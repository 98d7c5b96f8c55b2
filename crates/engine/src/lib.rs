pub mod backorder;
pub mod collab;
pub mod config;
pub mod error;
pub mod orders;
pub mod payments;
pub mod stock;
pub mod sweeper;
pub mod transitions;

pub use backorder::BackorderUpdate;
pub use collab::{
    CollabError, DocumentKind, DocumentRenderer, NoopNotifier, Notification, Notifier,
};
pub use config::EngineConfig;
pub use error::{ApiError, EngineError, ErrorKind};
pub use orders::{CreatedOrder, NewLineItem, NewOrder, OrderFilter, SpecUpdate, StockShortage, Worklist};
pub use payments::{PaymentHistory, PaymentLine, PaymentOutcome};
pub use stock::{GoodsReceipt, ReceiptLine, ReceiptReport};
pub use sweeper::{EscalationSweeper, SweepFailure, SweepReport};
pub use transitions::{QcFailure, ScanKind, ScanOutcome, TransitionRequest};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use stitchline_core::{
    capability::{self, OrderFacts},
    ids::*,
    Actor, AuditAction, Capability, CapabilitySet, Clock, Order, OrderStatus, OrderView, Role,
    StaffMember, SystemClock, ViewPolicy,
};
use stitchline_storage::{SqliteStorage, Storage, StoreTx};

pub struct Engine {
    storage: SqliteStorage,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    pub fn new(storage: SqliteStorage, config: EngineConfig) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Opens the database named by `config.database_path`.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(&config.database_path)?;
        Ok(Self::new(storage, config))
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::new(SqliteStorage::open_in_memory()?, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Hands committed audit entries to the notifier. Failures are logged
    /// and never reach the caller.
    pub(crate) fn dispatch(&self, outbox: Vec<Notification>) {
        for notification in &outbox {
            if let Err(e) = self.notifier.notify(notification) {
                warn!(
                    action = %notification.entry.action,
                    seq = notification.entry.seq,
                    error = %e,
                    "notification delivery failed"
                );
            }
        }
    }

    /// Role-filtered snapshot of an order as `actor` sees it right now.
    pub(crate) fn view_for(&self, order: &Order, actor: &Actor) -> Result<OrderView, EngineError> {
        let caps = capabilities_of(order, actor);
        let items = self.storage.get_items(order.id)?;
        let directory = self.storage.staff_directory()?;
        Ok(OrderView::build(
            order,
            &items,
            caps,
            &ViewPolicy::for_actor(actor, &caps),
            &directory,
        ))
    }

    pub(crate) fn reload_view(&self, order_id: OrderId, actor: &Actor) -> Result<OrderView, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        self.view_for(&order, actor)
    }
}

pub(crate) fn facts(order: &Order) -> OrderFacts<'_> {
    OrderFacts {
        status: order.status,
        sales_id: order.sales_id,
        assignees: &order.assignees,
        backorder: order.backorder.status,
    }
}

pub(crate) fn capabilities_of(order: &Order, actor: &Actor) -> CapabilitySet {
    capability::capabilities(&facts(order), actor)
}

pub(crate) fn require(order: &Order, actor: &Actor, cap: Capability) -> Result<(), EngineError> {
    if capabilities_of(order, actor).contains(cap) {
        Ok(())
    } else {
        warn!(order = %order.job_code, actor = %actor.id, role = %actor.role, capability = %cap, "action denied");
        Err(EngineError::denied(cap))
    }
}

pub(crate) fn load_order(reader: &impl Storage, order_id: OrderId) -> Result<Order, EngineError> {
    reader
        .get_order(order_id)?
        .ok_or_else(|| EngineError::not_found(order_id))
}

/// Whether `actor` may read the order at all.
pub(crate) fn can_see(order: &Order, actor: &Actor) -> bool {
    match actor.role {
        Role::Graphic | Role::Stock | Role::Production | Role::SewingQc | Role::Delivery => {
            OrderStatus::department_window(actor.role).contains(&order.status)
                || order.assignees.owns_any(actor.id)
        }
        _ => true,
    }
}

pub(crate) fn ensure_visible(order: &Order, actor: &Actor) -> Result<(), EngineError> {
    if can_see(order, actor) {
        Ok(())
    } else {
        warn!(order = %order.job_code, actor = %actor.id, role = %actor.role, "order outside caller's view");
        Err(EngineError::Unauthorized { action: "view" })
    }
}

pub(crate) fn record_actor(tx: &StoreTx<'_>, actor: &Actor, at: DateTime<Utc>) -> Result<(), EngineError> {
    let member = StaffMember {
        id: actor.id,
        name: actor.name.clone(),
        role: actor.role,
    };
    tx.upsert_staff(&member, at)?;
    Ok(())
}

/// Appends an audit entry inside `tx` and queues it for post-commit delivery.
pub(crate) fn audit(
    tx: &StoreTx<'_>,
    outbox: &mut Vec<Notification>,
    order: Option<&Order>,
    actor: Option<UserId>,
    action: AuditAction,
    detail: impl Into<String>,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let detail = detail.into();
    let entry = tx.append_audit(order.map(|o| o.id), actor, action, &detail, at)?;
    outbox.push(Notification {
        order_id: order.map(|o| o.id),
        job_code: order.map(|o| o.job_code.clone()),
        entry,
    });
    Ok(())
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

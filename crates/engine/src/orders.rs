//! Order creation, reads, worklists and the edits that do not move status.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use stitchline_core::{
    capability::claimable_slot,
    ids::*,
    spec_value::{self, SpecPayload},
    view::{audit_view, AuditEntryView},
    Actor, AuditAction, BackorderState, BackorderStatus, Capability, CapabilitySet, Customer,
    Financials, LineItem, Order, OrderStatus, OrderView, PaymentEntry, PaymentMethod,
    PurchaseRequest, QcTally, RequestStatus, Role, ViewPolicy,
};
use stitchline_storage::{OrderQuery, Storage};

use crate::collab::{DocumentKind, DocumentRenderer};
use crate::error::{EngineError, ErrorKind};
use crate::{
    audit, can_see, capabilities_of, ensure_visible, facts, load_order, non_blank, record_actor,
    require, Engine,
};

#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub specs: SpecPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer: Customer,
    pub notes: String,
    pub due_date: Option<NaiveDate>,
    pub payment_method: PaymentMethod,
    pub specs: SpecPayload,
    pub items: Vec<NewLineItem>,
    pub deposit: Decimal,
    /// Slip for the deposit. Without one the deposit is kept as a legacy amount.
    pub deposit_evidence: Option<String>,
}

impl NewOrder {
    pub fn new(customer_name: impl Into<String>, customer_phone: impl Into<String>) -> Self {
        Self {
            customer: Customer {
                name: customer_name.into(),
                phone: customer_phone.into(),
            },
            notes: String::new(),
            due_date: None,
            payment_method: PaymentMethod::Transfer,
            specs: SpecPayload::new(),
            items: Vec::new(),
            deposit: Decimal::ZERO,
            deposit_evidence: None,
        }
    }

    pub fn item(mut self, variant_id: VariantId, quantity: u32, unit_price: Decimal) -> Self {
        self.items.push(NewLineItem {
            variant_id,
            quantity,
            unit_price,
            specs: SpecPayload::new(),
        });
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.customer.name.trim().is_empty() {
            return Err(EngineError::Validation("customer name is required".into()));
        }
        if self.items.is_empty() {
            return Err(EngineError::Validation("an order needs at least one line item".into()));
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(EngineError::Validation(format!("line {} has zero quantity", i + 1)));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(EngineError::Validation(format!("line {} has a negative price", i + 1)));
            }
            spec_value::validate_payload(&item.specs)?;
        }
        spec_value::validate_payload(&self.specs)?;
        if self.deposit < Decimal::ZERO {
            return Err(EngineError::Validation("deposit cannot be negative".into()));
        }
        Ok(())
    }

    fn total(&self) -> Result<Decimal, EngineError> {
        self.items
            .iter()
            .enumerate()
            .try_fold(Decimal::ZERO, |acc, (i, item)| {
                item.unit_price
                    .checked_mul(Decimal::from(item.quantity))
                    .and_then(|line| acc.checked_add(line))
                    .ok_or_else(|| {
                        EngineError::Validation(format!("order total overflows at line {}", i + 1))
                    })
            })
    }
}

/// Informational notice that a line could not be fully reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockShortage {
    pub code: &'static str,
    pub line_no: u32,
    pub variant_id: VariantId,
    pub requested: u32,
    pub reserved: u32,
    pub backordered: u32,
    pub request_id: PurchaseRequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedOrder {
    pub order: OrderView,
    pub shortages: Vec<StockShortage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Worklist {
    /// Everything the caller may see.
    #[default]
    All,
    /// Orders the caller currently holds and has not yet handed on.
    MyTasks,
    /// Orders the caller could claim right now.
    Available,
    /// Orders the caller ever held or created, any status.
    History,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub worklist: Worklist,
    pub status: Option<OrderStatus>,
    pub search: Option<String>,
}

impl OrderFilter {
    pub fn worklist(worklist: Worklist) -> Self {
        Self {
            worklist,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecUpdate {
    /// Merged into the order payload; `Null` values remove keys.
    pub order_specs: Option<SpecPayload>,
    pub artwork_ref: Option<String>,
    pub production_file_ref: Option<String>,
    /// Per-line patches keyed by line number.
    pub item_specs: Vec<(u32, SpecPayload)>,
}

impl SpecUpdate {
    fn is_empty(&self) -> bool {
        self.order_specs.is_none()
            && self.artwork_ref.is_none()
            && self.production_file_ref.is_none()
            && self.item_specs.is_empty()
    }
}

fn in_worklist(order: &Order, actor: &Actor, worklist: Worklist) -> bool {
    match worklist {
        Worklist::All => can_see(order, actor),
        Worklist::Available => claimable_slot(&facts(order), actor)
            .is_some_and(|d| order.assignees.slot(d).is_none()),
        Worklist::History => {
            order.assignees.owns_any(actor.id)
                || (actor.role == Role::Sales && order.is_creator(actor.id))
        }
        Worklist::MyTasks => {
            if order.status.is_terminal() {
                return false;
            }
            match actor.role {
                Role::Sales => order.is_creator(actor.id),
                Role::Delivery => OrderStatus::department_window(actor.role).contains(&order.status),
                Role::Purchasing => order.backorder.status.is_pending(),
                role => role.department().is_some_and(|d| {
                    order.assignees.owns(d, actor.id)
                        && OrderStatus::department_window(role).contains(&order.status)
                }),
            }
        }
    }
}

impl Engine {
    /// Creates an order, reserving stock per line and raising a purchase
    /// request for every shortfall. Shortfalls never fail the call.
    pub fn create_order(&mut self, actor: &Actor, new: NewOrder) -> Result<CreatedOrder, EngineError> {
        if !(actor.role == Role::Sales || actor.role.is_admin()) {
            warn!(actor = %actor.id, role = %actor.role, "order creation denied");
            return Err(EngineError::Unauthorized { action: "createOrder" });
        }
        new.validate()?;
        let total = new.total()?;
        if new.deposit > total {
            return Err(EngineError::Validation(format!(
                "deposit {} exceeds order total {total}",
                new.deposit
            )));
        }

        let now = self.now();
        let today = self.clock().today();
        let order_id = OrderId::new();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        record_actor(&tx, actor, now)?;

        let mut items = Vec::with_capacity(new.items.len());
        let mut shortfalls = Vec::new();
        for (i, line) in new.items.iter().enumerate() {
            let line_no = i as u32 + 1;
            if tx.get_variant(line.variant_id)?.is_none() {
                return Err(EngineError::Validation(format!(
                    "line {line_no}: unknown variant {}",
                    line.variant_id
                )));
            }
            let reserved = tx.take_stock(line.variant_id, line.quantity)?;
            if reserved < line.quantity {
                shortfalls.push((line_no, line.variant_id, line.quantity, reserved));
            }
            items.push(LineItem {
                line_no,
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                specs: line.specs.clone(),
            });
        }

        let seq = tx.next_job_seq(today)?;
        let job_code = JobCode::compose(&actor.job_prefix(), today, seq);
        let evidence = non_blank(new.deposit_evidence.as_deref()).map(str::to_string);
        let legacy_deposit = if evidence.is_some() { Decimal::ZERO } else { new.deposit };

        let order = Order {
            id: order_id,
            job_code,
            customer: new.customer,
            notes: new.notes,
            status: OrderStatus::PendingArtwork,
            sales_id: actor.id,
            assignees: Default::default(),
            financials: Financials {
                total_price: total,
                paid_amount: new.deposit,
                legacy_deposit,
                payment_method: new.payment_method,
            },
            backorder: BackorderState {
                status: if shortfalls.is_empty() {
                    BackorderStatus::NoShortage
                } else {
                    BackorderStatus::WaitingInput
                },
                ..BackorderState::default()
            },
            is_urgent: false,
            urgent_note: None,
            tracking_no: None,
            artwork_ref: None,
            production_file_ref: None,
            specs: new.specs,
            due_date: new.due_date,
            created_at: now,
            updated_at: now,
            production_started_at: None,
            production_completed_at: None,
            qc: QcTally::default(),
        };
        tx.insert_order(&order)?;
        for item in &items {
            tx.insert_item(order_id, item)?;
        }

        let mut shortages = Vec::with_capacity(shortfalls.len());
        for (line_no, variant_id, requested, reserved) in shortfalls {
            let request = PurchaseRequest {
                id: PurchaseRequestId::new(),
                order_id,
                variant_id,
                quantity: requested - reserved,
                status: RequestStatus::Pending,
                created_at: now,
            };
            tx.insert_purchase_request(&request)?;
            shortages.push(StockShortage {
                code: ErrorKind::StockInsufficient.code(),
                line_no,
                variant_id,
                requested,
                reserved,
                backordered: request.quantity,
                request_id: request.id,
            });
        }

        if let Some(slip) = evidence.filter(|_| new.deposit > Decimal::ZERO) {
            tx.insert_payment(&PaymentEntry {
                id: PaymentId::new(),
                order_id,
                amount: new.deposit,
                method: PaymentMethod::Transfer,
                evidence_ref: Some(slip),
                note: Some("deposit".into()),
                uploaded_by: actor.id,
                created_at: now,
            })?;
        }

        let mut detail = format!("created by {}", actor.name);
        if !shortages.is_empty() {
            detail.push_str(&format!(" ({} line(s) backordered)", shortages.len()));
        }
        audit(&tx, &mut outbox, Some(&order), Some(actor.id), AuditAction::OrderCreated, detail, now)?;
        tx.commit()?;

        info!(
            order_id = %order.id,
            job_code = %order.job_code,
            actor = %actor.id,
            total = %total,
            backordered = shortages.len(),
            "order created"
        );
        self.dispatch(outbox);
        Ok(CreatedOrder {
            order: self.view_for(&order, actor)?,
            shortages,
        })
    }

    pub fn get_order(&self, actor: &Actor, order_id: OrderId) -> Result<OrderView, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        ensure_visible(&order, actor)?;
        self.view_for(&order, actor)
    }

    pub fn find_by_job_code(&self, actor: &Actor, job_code: &str) -> Result<OrderView, EngineError> {
        let order = self
            .storage
            .find_order_by_job_code(job_code)?
            .ok_or_else(|| EngineError::not_found(job_code.trim()))?;
        ensure_visible(&order, actor)?;
        self.view_for(&order, actor)
    }

    /// Lists orders for one of the caller's worklists, urgent first, then newest.
    pub fn list_orders(&self, actor: &Actor, filter: &OrderFilter) -> Result<Vec<OrderView>, EngineError> {
        let query = OrderQuery {
            status: filter.status,
            search: filter.search.clone(),
            sales_id: (actor.role == Role::Sales).then_some(actor.id),
            include_terminal: matches!(filter.worklist, Worklist::All | Worklist::History),
        };
        let orders = self.storage.list_orders(&query)?;
        let directory = self.storage.staff_directory()?;
        let mut views = Vec::new();
        for order in orders.iter().filter(|o| in_worklist(o, actor, filter.worklist)) {
            let caps = capabilities_of(order, actor);
            let items = self.storage.get_items(order.id)?;
            views.push(OrderView::build(
                order,
                &items,
                caps,
                &ViewPolicy::for_actor(actor, &caps),
                &directory,
            ));
        }
        debug!(actor = %actor.id, worklist = ?filter.worklist, count = views.len(), "orders listed");
        Ok(views)
    }

    pub fn capabilities(&self, actor: &Actor, order_id: OrderId) -> Result<CapabilitySet, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        Ok(capabilities_of(&order, actor))
    }

    /// Embroidery and artwork detail edits while the order is still with graphic.
    pub fn update_specs(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        update: SpecUpdate,
    ) -> Result<OrderView, EngineError> {
        if update.is_empty() {
            return Err(EngineError::Validation("nothing to update".into()));
        }
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        require(&order, actor, Capability::EditSpecs)?;
        if update.artwork_ref.is_some() || update.production_file_ref.is_some() {
            require(&order, actor, Capability::UploadArtwork)?;
        }
        record_actor(&tx, actor, now)?;

        let mut specs = order.specs.clone();
        let mut changed = Vec::new();
        if let Some(patch) = update.order_specs {
            spec_value::merge_payload(&mut specs, patch);
            spec_value::validate_payload(&specs)?;
            changed.push("order specs".to_string());
        }
        let artwork = non_blank(update.artwork_ref.as_deref());
        let production_file = non_blank(update.production_file_ref.as_deref());
        if artwork.is_some() {
            changed.push("artwork".into());
        }
        if production_file.is_some() {
            changed.push("production file".into());
        }
        tx.update_specs(order_id, &specs, artwork, production_file, now)?;

        if !update.item_specs.is_empty() {
            let items = tx.get_items(order_id)?;
            for (line_no, patch) in update.item_specs {
                let item = items.iter().find(|i| i.line_no == line_no).ok_or_else(|| {
                    EngineError::Validation(format!("order has no line {line_no}"))
                })?;
                let mut merged = item.specs.clone();
                spec_value::merge_payload(&mut merged, patch);
                spec_value::validate_payload(&merged)?;
                tx.update_item_specs(order_id, line_no, &merged)?;
                changed.push(format!("line {line_no}"));
            }
        }

        audit(
            &tx,
            &mut outbox,
            Some(&order),
            Some(actor.id),
            AuditAction::SpecsUpdated,
            format!("updated {}", changed.join(", ")),
            now,
        )?;
        tx.commit()?;
        info!(order_id = %order_id, job_code = %order.job_code, actor = %actor.id, "specs updated");
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }

    pub fn mark_urgent(
        &mut self,
        actor: &Actor,
        order_id: OrderId,
        note: Option<String>,
    ) -> Result<OrderView, EngineError> {
        let now = self.now();
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        require(&order, actor, Capability::MarkUrgent)?;
        record_actor(&tx, actor, now)?;
        let note = non_blank(note.as_deref());
        tx.set_urgent(order_id, note, now)?;
        audit(
            &tx,
            &mut outbox,
            Some(&order),
            Some(actor.id),
            AuditAction::MarkedUrgent,
            note.unwrap_or_default(),
            now,
        )?;
        tx.commit()?;
        info!(order_id = %order_id, job_code = %order.job_code, actor = %actor.id, "order marked urgent");
        self.dispatch(outbox);
        self.reload_view(order_id, actor)
    }

    /// The order's audit timeline with names masked for the caller.
    pub fn audit_trail(&self, actor: &Actor, order_id: OrderId) -> Result<Vec<AuditEntryView>, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        ensure_visible(&order, actor)?;
        let entries = self.storage.audit_for_order(order_id)?;
        let directory = self.storage.staff_directory()?;
        Ok(audit_view(&entries, actor, &directory))
    }

    /// Recomputes the audit hash chain; returns the number of entries checked.
    pub fn verify_audit_chain(&self) -> Result<usize, EngineError> {
        Ok(self.storage.verify_audit_chain()?)
    }

    /// Renders a printable document from the unfiltered snapshot.
    pub fn render_document(
        &self,
        actor: &Actor,
        order_id: OrderId,
        kind: DocumentKind,
        renderer: &dyn DocumentRenderer,
    ) -> Result<Vec<u8>, EngineError> {
        let order = load_order(&self.storage, order_id)?;
        ensure_visible(&order, actor)?;
        let items = self.storage.get_items(order_id)?;
        let directory = self.storage.staff_directory()?;
        let view = OrderView::build(
            &order,
            &items,
            CapabilitySet::empty(),
            &ViewPolicy::full(),
            &directory,
        );
        renderer.render(kind, &view).map_err(|e| {
            warn!(order_id = %order_id, kind = ?kind, error = %e, "document rendering failed");
            EngineError::Collaborator(e.to_string())
        })
    }
}

//! Role-filtered outbound snapshots.
//!
//! A [`ViewPolicy`] is computed once per (order, caller) from the capability
//! set and then drives every field decision, including masking worker names
//! of other departments down to a department label.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::audit::AuditAction;
use crate::capability::{Capability, CapabilitySet};
use crate::ids::{JobCode, OrderId, UserId, VariantId};
use crate::order::{Actor, AuditEntry, Customer, LineItem, Order, QcTally, StaffMember};
use crate::spec_value::SpecPayload;
use crate::status::*;

pub type StaffDirectory = HashMap<UserId, StaffMember>;

pub const SYSTEM_LABEL: &str = "System";
const UNKNOWN_LABEL: &str = "Staff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewPolicy {
    pub viewer: Option<UserId>,
    pub financial: bool,
    pub technical: bool,
    pub backorder: bool,
    pub unmasked: bool,
}

impl ViewPolicy {
    pub fn for_actor(actor: &Actor, caps: &CapabilitySet) -> Self {
        Self {
            viewer: Some(actor.id),
            financial: caps.contains(Capability::ViewFinancial),
            technical: caps.contains(Capability::ViewTechnical),
            backorder: caps.contains(Capability::ViewBackorder),
            unmasked: actor.role.is_admin(),
        }
    }

    /// Everything visible; used for rendered documents.
    pub fn full() -> Self {
        Self {
            viewer: None,
            financial: true,
            technical: true,
            backorder: true,
            unmasked: true,
        }
    }

    fn reveals(&self, user: UserId) -> bool {
        self.unmasked || self.viewer == Some(user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonView {
    pub id: Option<UserId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeView {
    pub department: Department,
    pub worker: Option<PersonView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialView {
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalView {
    pub specs: SpecPayload,
    pub artwork_ref: Option<String>,
    pub production_file_ref: Option<String>,
    pub production_started_at: Option<DateTime<Utc>>,
    pub production_completed_at: Option<DateTime<Utc>>,
    pub qc: QcTally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackorderView {
    pub status: BackorderStatus,
    pub eta: Option<NaiveDate>,
    pub eta_revisions: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItemView {
    pub line_no: u32,
    pub variant_id: VariantId,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specs: Option<SpecPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub job_code: JobCode,
    pub status: OrderStatus,
    pub customer: Customer,
    pub notes: String,
    pub sales: PersonView,
    pub assignees: Vec<AssigneeView>,
    pub is_urgent: bool,
    pub urgent_note: Option<String>,
    pub tracking_no: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<LineItemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financial: Option<FinancialView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical: Option<TechnicalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backorder: Option<BackorderView>,
    pub capabilities: CapabilitySet,
}

fn person(
    user: UserId,
    label: &str,
    policy: &ViewPolicy,
    directory: &StaffDirectory,
) -> PersonView {
    if policy.reveals(user) {
        let name = directory
            .get(&user)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        PersonView {
            id: Some(user),
            name,
        }
    } else {
        PersonView {
            id: None,
            name: label.to_string(),
        }
    }
}

impl OrderView {
    pub fn build(
        order: &Order,
        items: &[LineItem],
        capabilities: CapabilitySet,
        policy: &ViewPolicy,
        directory: &StaffDirectory,
    ) -> Self {
        let assignees = order
            .assignees
            .iter()
            .map(|(department, slot)| AssigneeView {
                department,
                worker: slot.map(|user| person(user, department.label(), policy, directory)),
            })
            .collect();

        let items = items
            .iter()
            .map(|item| LineItemView {
                line_no: item.line_no,
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price: policy.financial.then_some(item.unit_price),
                specs: policy.technical.then(|| item.specs.clone()),
            })
            .collect();

        let f = &order.financials;
        Self {
            id: order.id,
            job_code: order.job_code.clone(),
            status: order.status,
            customer: order.customer.clone(),
            notes: order.notes.clone(),
            sales: person(order.sales_id, Role::Sales.label(), policy, directory),
            assignees,
            is_urgent: order.is_urgent,
            urgent_note: order.urgent_note.clone(),
            tracking_no: order.tracking_no.clone(),
            due_date: order.due_date,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items,
            financial: policy.financial.then(|| FinancialView {
                total_price: f.total_price,
                paid_amount: f.paid_amount,
                balance_due: f.balance_due(),
                payment_status: f.payment_status(),
                payment_method: f.payment_method,
            }),
            technical: policy.technical.then(|| TechnicalView {
                specs: order.specs.clone(),
                artwork_ref: order.artwork_ref.clone(),
                production_file_ref: order.production_file_ref.clone(),
                production_started_at: order.production_started_at,
                production_completed_at: order.production_completed_at,
                qc: order.qc,
            }),
            backorder: policy.backorder.then(|| BackorderView {
                status: order.backorder.status,
                eta: order.backorder.eta,
                eta_revisions: order.backorder.eta_revisions,
                reason: order.backorder.reason.clone(),
            }),
            capabilities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntryView {
    pub seq: i64,
    pub action: AuditAction,
    pub detail: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Audit timeline as seen by `viewer`, oldest first.
pub fn audit_view(
    entries: &[AuditEntry],
    viewer: &Actor,
    directory: &StaffDirectory,
) -> Vec<AuditEntryView> {
    entries
        .iter()
        .filter(|e| !(viewer.role == Role::Sales && e.action.hidden_from_sales()))
        .map(|e| {
            let actor = match e.actor {
                None => SYSTEM_LABEL.to_string(),
                Some(id) => match directory.get(&id) {
                    Some(member) if id == viewer.id || viewer.role.is_admin() => {
                        member.name.clone()
                    }
                    Some(member) => member.role.label().to_string(),
                    None => UNKNOWN_LABEL.to_string(),
                },
            };
            AuditEntryView {
                seq: e.seq,
                action: e.action,
                detail: e.detail.clone(),
                actor,
                at: e.at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::capability::{capabilities, OrderFacts};
    use crate::order::{Assignees, BackorderState, Financials};

    fn member(actor: &Actor) -> StaffMember {
        StaffMember {
            id: actor.id,
            name: actor.name.clone(),
            role: actor.role,
        }
    }

    fn sample(sales: &Actor, graphic: &Actor) -> Order {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        Order {
            id: OrderId::new(),
            job_code: JobCode::from_raw("S1/20260301-001"),
            customer: Customer {
                name: "Acme Uniforms".into(),
                phone: "555-0100".into(),
            },
            notes: String::new(),
            status: OrderStatus::Designing,
            sales_id: sales.id,
            assignees: Assignees {
                graphic: Some(graphic.id),
                ..Assignees::default()
            },
            financials: Financials {
                total_price: Decimal::from(1000),
                paid_amount: Decimal::from(400),
                legacy_deposit: Decimal::ZERO,
                payment_method: PaymentMethod::Transfer,
            },
            backorder: BackorderState::default(),
            is_urgent: false,
            urgent_note: None,
            tracking_no: None,
            artwork_ref: Some("file://art.png".into()),
            production_file_ref: None,
            specs: SpecPayload::new(),
            due_date: None,
            created_at: at,
            updated_at: at,
            production_started_at: None,
            production_completed_at: None,
            qc: QcTally::default(),
        }
    }

    fn view_for(order: &Order, actor: &Actor, directory: &StaffDirectory) -> OrderView {
        let facts = OrderFacts {
            status: order.status,
            sales_id: order.sales_id,
            assignees: &order.assignees,
            backorder: order.backorder.status,
        };
        let caps = capabilities(&facts, actor);
        OrderView::build(order, &[], caps, &ViewPolicy::for_actor(actor, &caps), directory)
    }

    #[test]
    fn other_departments_are_masked() {
        let sales = Actor::new("Sue", Role::Sales);
        let graphic = Actor::new("Gus", Role::Graphic);
        let stock = Actor::new("Sam", Role::Stock);
        let admin = Actor::new("Ada", Role::Admin);
        let directory: StaffDirectory = [&sales, &graphic, &stock, &admin]
            .into_iter()
            .map(|a| (a.id, member(a)))
            .collect();
        let order = sample(&sales, &graphic);

        let seen_by_stock = view_for(&order, &stock, &directory);
        let slot = seen_by_stock.assignees[0].worker.clone().unwrap();
        assert_eq!(slot.name, "Graphic Dept");
        assert_eq!(slot.id, None);
        assert_eq!(seen_by_stock.sales.name, "Sales Dept");
        assert!(seen_by_stock.financial.is_none());
        assert!(seen_by_stock.technical.is_some());

        let seen_by_graphic = view_for(&order, &graphic, &directory);
        assert_eq!(seen_by_graphic.assignees[0].worker.as_ref().unwrap().name, "Gus");

        let seen_by_admin = view_for(&order, &admin, &directory);
        assert_eq!(seen_by_admin.assignees[0].worker.as_ref().unwrap().name, "Gus");
        assert_eq!(seen_by_admin.sales.name, "Sue");

        let seen_by_sales = view_for(&order, &sales, &directory);
        assert_eq!(seen_by_sales.sales.name, "Sue");
        assert_eq!(
            seen_by_sales.financial.as_ref().unwrap().balance_due,
            Decimal::from(600)
        );
        assert!(seen_by_sales.technical.is_none());
        assert!(seen_by_sales.assignees[1].worker.is_none());
    }

    #[test]
    fn audit_masks_actor_and_hides_minor_entries_from_sales() {
        let sales = Actor::new("Sue", Role::Sales);
        let graphic = Actor::new("Gus", Role::Graphic);
        let directory: StaffDirectory = [&sales, &graphic]
            .into_iter()
            .map(|a| (a.id, member(a)))
            .collect();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let entry = |seq, actor, action| AuditEntry {
            seq,
            order_id: None,
            actor,
            action,
            detail: String::new(),
            at,
        };
        let entries = vec![
            entry(1, Some(sales.id), AuditAction::OrderCreated),
            entry(2, Some(graphic.id), AuditAction::SpecsUpdated),
            entry(3, Some(graphic.id), AuditAction::StatusChanged),
            entry(4, None, AuditAction::InactivityEscalated),
        ];

        let for_sales = audit_view(&entries, &sales, &directory);
        let names: Vec<_> = for_sales.iter().map(|e| e.actor.as_str()).collect();
        assert_eq!(names, vec!["Sue", "Graphic Dept", SYSTEM_LABEL]);

        let for_graphic = audit_view(&entries, &graphic, &directory);
        assert_eq!(for_graphic.len(), 4);
        assert_eq!(for_graphic[0].actor, "Sales Dept");
        assert_eq!(for_graphic[1].actor, "Gus");
    }

    #[test]
    fn full_policy_reveals_everything() {
        let sales = Actor::new("Sue", Role::Sales);
        let graphic = Actor::new("Gus", Role::Graphic);
        let directory: StaffDirectory = [(graphic.id, member(&graphic))].into_iter().collect();
        let order = sample(&sales, &graphic);
        let view = OrderView::build(
            &order,
            &[],
            CapabilitySet::empty(),
            &ViewPolicy::full(),
            &directory,
        );
        assert!(view.financial.is_some() && view.technical.is_some() && view.backorder.is_some());
        assert_eq!(view.assignees[0].worker.as_ref().unwrap().name, "Gus");
        assert_eq!(view.sales.name, "Staff");
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::AuditAction;
use crate::ids::*;
use crate::spec_value::SpecPayload;
use crate::status::*;

/// The acting user as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub department_code: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            role,
            department_code: None,
        }
    }

    pub fn with_department_code(mut self, code: impl Into<String>) -> Self {
        self.department_code = Some(code.into());
        self
    }

    /// Prefix used in job codes created by this user.
    pub fn job_prefix(&self) -> String {
        match &self.department_code {
            Some(code) if !code.trim().is_empty() => code.trim().to_string(),
            _ => format!("S{}", self.id.tail()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignees {
    pub graphic: Option<UserId>,
    pub stock: Option<UserId>,
    pub production: Option<UserId>,
    pub qc: Option<UserId>,
}

impl Assignees {
    pub fn slot(&self, department: Department) -> Option<UserId> {
        match department {
            Department::Graphic => self.graphic,
            Department::Stock => self.stock,
            Department::Production => self.production,
            Department::Qc => self.qc,
        }
    }

    pub fn owns(&self, department: Department, user: UserId) -> bool {
        self.slot(department) == Some(user)
    }

    pub fn owns_any(&self, user: UserId) -> bool {
        Department::ALL.iter().any(|d| self.owns(*d, user))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Department, Option<UserId>)> + '_ {
        Department::ALL.iter().map(|d| (*d, self.slot(*d)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Financials {
    pub total_price: Decimal,
    /// Cached fold of `legacy_deposit` plus every payment entry.
    pub paid_amount: Decimal,
    pub legacy_deposit: Decimal,
    pub payment_method: PaymentMethod,
}

impl Financials {
    pub fn balance_due(&self) -> Decimal {
        (self.total_price - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::derive(self.total_price, self.paid_amount)
    }

    /// Shipment gate: nothing owed, or the balance is collected on delivery.
    pub fn clears_shipment(&self) -> bool {
        self.balance_due() <= Decimal::ZERO
            || self.payment_method == PaymentMethod::CashOnDelivery
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderState {
    pub status: BackorderStatus,
    pub eta: Option<NaiveDate>,
    pub eta_revisions: u32,
    pub reason: Option<String>,
}

impl Default for BackorderState {
    fn default() -> Self {
        Self {
            status: BackorderStatus::NoShortage,
            eta: None,
            eta_revisions: 0,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub job_code: JobCode,
    pub customer: Customer,
    pub notes: String,
    pub status: OrderStatus,
    pub sales_id: UserId,
    pub assignees: Assignees,
    pub financials: Financials,
    pub backorder: BackorderState,
    pub is_urgent: bool,
    pub urgent_note: Option<String>,
    pub tracking_no: Option<String>,
    pub artwork_ref: Option<String>,
    pub production_file_ref: Option<String>,
    pub specs: SpecPayload,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub production_started_at: Option<DateTime<Utc>>,
    pub production_completed_at: Option<DateTime<Utc>>,
    pub qc: QcTally,
}

/// Running totals of failed quality checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcTally {
    pub rejections: u32,
    pub damaged: u32,
}

impl Order {
    pub fn is_creator(&self, user: UserId) -> bool {
        self.sales_id == user
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub line_no: u32,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub specs: SpecPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub id: PurchaseRequestId,
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub evidence_ref: Option<String>,
    pub note: Option<String>,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub order_id: Option<OrderId>,
    /// `None` for system-authored entries.
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub sku: String,
    pub stock: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salespeople_without_codes_get_distinct_prefixes() {
        let nok = Actor::new("Nok", Role::Sales);
        let pim = Actor::new("Pim", Role::Sales);
        assert_ne!(nok.job_prefix(), pim.job_prefix());
        assert!(nok.job_prefix().starts_with('S'));
        assert_eq!(nok.job_prefix(), format!("S{}", nok.id.tail()));
    }

    #[test]
    fn department_code_wins_when_present() {
        let nok = Actor::new("Nok", Role::Sales).with_department_code(" SA ");
        assert_eq!(nok.job_prefix(), "SA");
        let blank = Actor::new("Pim", Role::Sales).with_department_code("  ");
        assert_eq!(blank.job_prefix(), format!("S{}", blank.id.tail()));
    }
}

//! Per-order, per-user capability computation.
//!
//! Capabilities are derived from the caller's role, whether the caller owns
//! the relevant department slot, and the order's current status. Nothing
//! here is persisted; callers recompute on every read.

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::ids::UserId;
use crate::order::{Actor, Assignees};
use crate::status::{BackorderStatus, Department, OrderStatus, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Claim,
    EditSpecs,
    Cancel,
    MarkUrgent,
    UploadArtwork,
    SendToNext,
    ConfirmStock,
    ReportIssue,
    StartProduction,
    FinishProduction,
    PassQc,
    FailQc,
    ReceiveForShip,
    Ship,
    RecordPayment,
    ViewFinancial,
    ViewTechnical,
    ViewBackorder,
    EditBackorder,
    ConfirmArrival,
    ReleaseClaim,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Self::Claim,
        Self::EditSpecs,
        Self::Cancel,
        Self::MarkUrgent,
        Self::UploadArtwork,
        Self::SendToNext,
        Self::ConfirmStock,
        Self::ReportIssue,
        Self::StartProduction,
        Self::FinishProduction,
        Self::PassQc,
        Self::FailQc,
        Self::ReceiveForShip,
        Self::Ship,
        Self::RecordPayment,
        Self::ViewFinancial,
        Self::ViewTechnical,
        Self::ViewBackorder,
        Self::EditBackorder,
        Self::ConfirmArrival,
        Self::ReleaseClaim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "canClaim",
            Self::EditSpecs => "canEditSpecs",
            Self::Cancel => "canCancel",
            Self::MarkUrgent => "canMarkUrgent",
            Self::UploadArtwork => "canUploadArtwork",
            Self::SendToNext => "canSendToNext",
            Self::ConfirmStock => "canConfirmStock",
            Self::ReportIssue => "canReportIssue",
            Self::StartProduction => "canStartProduction",
            Self::FinishProduction => "canFinishProduction",
            Self::PassQc => "canPassQC",
            Self::FailQc => "canFailQC",
            Self::ReceiveForShip => "canReceiveForShip",
            Self::Ship => "canShip",
            Self::RecordPayment => "canRecordPayment",
            Self::ViewFinancial => "canViewFinancial",
            Self::ViewTechnical => "canViewTechnical",
            Self::ViewBackorder => "canViewBackorder",
            Self::EditBackorder => "canEditBackorder",
            Self::ConfirmArrival => "canConfirmArrival",
            Self::ReleaseClaim => "canReleaseClaim",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(|c| self.contains(*c))
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|c| c.as_str())).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for cap in self.iter() {
            seq.serialize_element(cap.as_str())?;
        }
        seq.end()
    }
}

/// The slice of an order the decision table reads.
#[derive(Debug, Clone, Copy)]
pub struct OrderFacts<'a> {
    pub status: OrderStatus,
    pub sales_id: UserId,
    pub assignees: &'a Assignees,
    pub backorder: BackorderStatus,
}

#[derive(Debug, Clone, Copy)]
enum Grant {
    /// Any caller holding one of these roles.
    Roles(&'static [Role]),
    /// The department worker who owns the slot.
    Owner(Department),
    /// The department worker who owns the slot, or any worker of it while empty.
    OwnerOrUnclaimed(Department),
    /// A worker of the department while the slot is empty or already theirs.
    Claimable(Department),
    /// The salesperson who created the order, unless a backorder is pending.
    Creator,
    /// Administrative roles only.
    AdminOnly,
}

#[derive(Debug, Clone, Copy)]
enum Statuses {
    Any,
    NonTerminal,
    Only(&'static [OrderStatus]),
    Except(&'static [OrderStatus]),
}

impl Statuses {
    fn admits(self, status: OrderStatus) -> bool {
        match self {
            Statuses::Any => true,
            Statuses::NonTerminal => !status.is_terminal(),
            Statuses::Only(list) => list.contains(&status),
            Statuses::Except(list) => !list.contains(&status),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    capability: Capability,
    grant: Grant,
    statuses: Statuses,
    /// Administrative roles satisfy the grant regardless of ownership.
    admin: bool,
}

const fn rule(capability: Capability, grant: Grant, statuses: Statuses, admin: bool) -> Rule {
    Rule {
        capability,
        grant,
        statuses,
        admin,
    }
}

use Capability as C;
use Department as D;
use OrderStatus as S;

const ARTWORK: Statuses = Statuses::Only(&[S::PendingArtwork, S::Designing]);

const TABLE: &[Rule] = &[
    rule(C::Claim, Grant::Claimable(D::Graphic), Statuses::Only(D::Graphic.claim_window()), false),
    rule(C::Claim, Grant::Claimable(D::Stock), Statuses::Only(D::Stock.claim_window()), false),
    rule(C::Claim, Grant::Claimable(D::Production), Statuses::Only(D::Production.claim_window()), false),
    rule(C::Claim, Grant::Claimable(D::Qc), Statuses::Only(D::Qc.claim_window()), false),
    rule(C::EditSpecs, Grant::OwnerOrUnclaimed(D::Graphic), ARTWORK, true),
    rule(C::Cancel, Grant::Creator, Statuses::Only(&[S::PendingArtwork, S::StockIssue]), false),
    rule(C::Cancel, Grant::AdminOnly, Statuses::NonTerminal, true),
    rule(C::MarkUrgent, Grant::Creator, Statuses::NonTerminal, true),
    rule(C::UploadArtwork, Grant::OwnerOrUnclaimed(D::Graphic), ARTWORK, true),
    rule(C::SendToNext, Grant::Owner(D::Graphic), Statuses::Only(&[S::Designing]), true),
    rule(C::ConfirmStock, Grant::Owner(D::Stock), Statuses::Only(&[S::PendingStockCheck, S::StockIssue]), true),
    rule(C::ReportIssue, Grant::Owner(D::Stock), Statuses::Only(&[S::PendingStockCheck]), true),
    rule(C::StartProduction, Grant::OwnerOrUnclaimed(D::Production), Statuses::Only(&[S::StockRechecked]), true),
    rule(C::FinishProduction, Grant::Owner(D::Production), Statuses::Only(&[S::InProduction]), true),
    rule(C::PassQc, Grant::Owner(D::Qc), Statuses::Only(&[S::ProductionFinished]), true),
    rule(C::FailQc, Grant::Owner(D::Qc), Statuses::Only(&[S::ProductionFinished]), true),
    rule(C::ReceiveForShip, Grant::Roles(&[Role::Delivery]), Statuses::Only(&[S::QcPassed]), true),
    rule(C::Ship, Grant::Roles(&[Role::Delivery]), Statuses::Only(&[S::ReadyToShip]), true),
    rule(C::RecordPayment, Grant::Roles(&[Role::Sales, Role::Delivery, Role::Finance]), Statuses::Except(&[S::Cancelled]), true),
    rule(C::ViewFinancial, Grant::Roles(&[Role::Sales, Role::Finance, Role::Marketing]), Statuses::Any, true),
    rule(C::ViewTechnical, Grant::Roles(&[Role::Graphic, Role::Production, Role::Stock, Role::SewingQc]), Statuses::Any, true),
    rule(C::ViewBackorder, Grant::Roles(&[Role::Sales, Role::Purchasing, Role::Stock, Role::Production]), Statuses::Any, true),
    rule(C::EditBackorder, Grant::Roles(&[Role::Purchasing]), Statuses::NonTerminal, true),
    rule(C::ConfirmArrival, Grant::Roles(&[Role::Purchasing]), Statuses::NonTerminal, true),
    rule(C::ReleaseClaim, Grant::AdminOnly, Statuses::NonTerminal, true),
];

fn grants(grant: Grant, facts: &OrderFacts<'_>, actor: &Actor) -> bool {
    let in_department = |d: Department| actor.role.department() == Some(d);
    match grant {
        Grant::Roles(roles) => roles.contains(&actor.role),
        Grant::Owner(d) => in_department(d) && facts.assignees.owns(d, actor.id),
        Grant::OwnerOrUnclaimed(d) | Grant::Claimable(d) => {
            in_department(d)
                && facts
                    .assignees
                    .slot(d)
                    .is_none_or(|owner| owner == actor.id)
        }
        Grant::Creator => {
            actor.role == Role::Sales
                && facts.sales_id == actor.id
                && !facts.backorder.is_pending()
        }
        Grant::AdminOnly => false,
    }
}

/// Computes the capability set of `actor` on the order described by `facts`.
pub fn capabilities(facts: &OrderFacts<'_>, actor: &Actor) -> CapabilitySet {
    let mut set = CapabilitySet::empty();
    for rule in TABLE {
        if set.contains(rule.capability) || !rule.statuses.admits(facts.status) {
            continue;
        }
        if grants(rule.grant, facts, actor) || (rule.admin && actor.role.is_admin()) {
            set.insert(rule.capability);
        }
    }
    set
}

/// The department slot `actor` would take by claiming, if the claim is allowed.
pub fn claimable_slot(facts: &OrderFacts<'_>, actor: &Actor) -> Option<Department> {
    let department = actor.role.department()?;
    let window = Statuses::Only(department.claim_window());
    (window.admits(facts.status)
        && grants(Grant::Claimable(department), facts, actor))
    .then_some(department)
}

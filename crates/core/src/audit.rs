use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Action labels recorded in the audit log. Closed set, never free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OrderCreated,
    TaskClaimed,
    ClaimReleased,
    StatusChanged,
    QcFailed,
    OrderCancelled,
    MarkedUrgent,
    SpecsUpdated,
    ProductionScan,
    PaymentRecorded,
    CodDeclared,
    PaymentReminder,
    BackorderUpdated,
    BackorderArrived,
    BackorderFulfilled,
    GoodsReceived,
    InactivityEscalated,
    BackorderDelayed,
    ExecutiveAlert,
}

impl AuditAction {
    pub const ALL: &'static [AuditAction] = &[
        Self::OrderCreated,
        Self::TaskClaimed,
        Self::ClaimReleased,
        Self::StatusChanged,
        Self::QcFailed,
        Self::OrderCancelled,
        Self::MarkedUrgent,
        Self::SpecsUpdated,
        Self::ProductionScan,
        Self::PaymentRecorded,
        Self::CodDeclared,
        Self::PaymentReminder,
        Self::BackorderUpdated,
        Self::BackorderArrived,
        Self::BackorderFulfilled,
        Self::GoodsReceived,
        Self::InactivityEscalated,
        Self::BackorderDelayed,
        Self::ExecutiveAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "ORDER_CREATED",
            Self::TaskClaimed => "TASK_CLAIMED",
            Self::ClaimReleased => "CLAIM_RELEASED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::QcFailed => "QC_FAILED",
            Self::OrderCancelled => "ORDER_CANCELLED",
            Self::MarkedUrgent => "MARKED_URGENT",
            Self::SpecsUpdated => "SPECS_UPDATED",
            Self::ProductionScan => "PRODUCTION_SCAN",
            Self::PaymentRecorded => "PAYMENT_RECORDED",
            Self::CodDeclared => "COD_DECLARED",
            Self::PaymentReminder => "PAYMENT_REMINDER",
            Self::BackorderUpdated => "BACKORDER_UPDATED",
            Self::BackorderArrived => "BACKORDER_ARRIVED",
            Self::BackorderFulfilled => "BACKORDER_FULFILLED",
            Self::GoodsReceived => "GOODS_RECEIVED",
            Self::InactivityEscalated => "INACTIVITY_ESCALATED",
            Self::BackorderDelayed => "BACKORDER_DELAYED",
            Self::ExecutiveAlert => "EXECUTIVE_ALERT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| CoreError::InvalidData(format!("unknown audit action: {s}")))
    }

    /// Internal bookkeeping entries hidden from the sales timeline.
    pub fn hidden_from_sales(&self) -> bool {
        matches!(self, Self::SpecsUpdated | Self::BackorderUpdated)
    }

    /// Entries that escalation consumers should page on.
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            Self::InactivityEscalated | Self::BackorderDelayed | Self::ExecutiveAlert
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

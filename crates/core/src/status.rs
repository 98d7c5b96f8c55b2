use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Closed enumerations persisted as their wire strings.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn parse(s: &str) -> Result<Self, CoreError> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(CoreError::InvalidData(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        s
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Canonical lifecycle status of an order.
    OrderStatus {
        PendingArtwork => "PENDING_ARTWORK",
        Designing => "DESIGNING",
        PendingStockCheck => "PENDING_STOCK_CHECK",
        StockIssue => "STOCK_ISSUE",
        StockRechecked => "STOCK_RECHECKED",
        InProduction => "IN_PRODUCTION",
        ProductionFinished => "PRODUCTION_FINISHED",
        QcPassed => "QC_PASSED",
        ReadyToShip => "READY_TO_SHIP",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
);

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses a department works in (and may see without owning the order).
    pub fn department_window(role: Role) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match role {
            Role::Graphic => &[PendingArtwork, Designing],
            Role::Stock => &[PendingStockCheck, StockIssue, StockRechecked],
            Role::Production => &[StockRechecked, InProduction, ProductionFinished],
            Role::SewingQc => &[ProductionFinished, QcPassed, ReadyToShip],
            Role::Delivery => &[QcPassed, ReadyToShip, Completed],
            _ => &[],
        }
    }
}

wire_enum!(
    Role {
        Admin => "ADMIN",
        SuperAdmin => "SUPER_ADMIN",
        Executive => "EXECUTIVE",
        Sales => "SALES",
        Marketing => "MARKETING",
        Finance => "FINANCE",
        Graphic => "GRAPHIC",
        Stock => "STOCK",
        Production => "PRODUCTION",
        SewingQc => "SEWING_QC",
        Delivery => "DELIVERY",
        Purchasing => "PURCHASING",
    }
);

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin | Self::Executive)
    }

    /// The ownership slot this role claims, if any.
    pub fn department(self) -> Option<Department> {
        match self {
            Self::Graphic => Some(Department::Graphic),
            Self::Stock => Some(Department::Stock),
            Self::Production => Some(Department::Production),
            Self::SewingQc => Some(Department::Qc),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Admin => "Administration",
            Self::SuperAdmin => "Administration",
            Self::Executive => "Management",
            Self::Sales => "Sales Dept",
            Self::Marketing => "Marketing Dept",
            Self::Finance => "Finance Dept",
            Self::Graphic => "Graphic Dept",
            Self::Stock => "Stock Dept",
            Self::Production => "Production Dept",
            Self::SewingQc => "Sewing/QC Dept",
            Self::Delivery => "Delivery Dept",
            Self::Purchasing => "Purchasing Dept",
        }
    }
}

wire_enum!(
    /// Department ownership slots on an order.
    Department {
        Graphic => "GRAPHIC",
        Stock => "STOCK",
        Production => "PRODUCTION",
        Qc => "QC",
    }
);

impl Department {
    pub fn label(self) -> &'static str {
        match self {
            Self::Graphic => "Graphic Dept",
            Self::Stock => "Stock Dept",
            Self::Production => "Production Dept",
            Self::Qc => "QC Dept",
        }
    }

    /// Statuses in which the slot may be claimed.
    pub const fn claim_window(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Self::Graphic => &[PendingArtwork, Designing],
            Self::Stock => &[PendingStockCheck, StockIssue],
            Self::Production => &[StockRechecked],
            Self::Qc => &[ProductionFinished],
        }
    }
}

wire_enum!(
    PaymentStatus {
        Unpaid => "UNPAID",
        Partial => "PARTIAL",
        Paid => "PAID",
    }
);

impl PaymentStatus {
    pub fn derive(total: Decimal, paid: Decimal) -> Self {
        if paid >= total {
            Self::Paid
        } else if paid > Decimal::ZERO {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }
}

wire_enum!(
    PaymentMethod {
        Transfer => "TRANSFER",
        CashOnDelivery => "COD",
    }
);

wire_enum!(
    /// Purchasing progress for an order that had a stock shortfall at creation.
    BackorderStatus {
        NoShortage => "NONE",
        WaitingInput => "WAITING_INPUT",
        WaitingArrival => "WAITING_ARRIVAL",
        DelayedRound1 => "DELAYED_ROUND_1",
        WaitingArrivalRevised => "WAITING_ARRIVAL_REVISED",
        DelayedRound2 => "DELAYED_ROUND_2",
        Arrived => "ARRIVED",
    }
);

impl BackorderStatus {
    pub fn is_pending(self) -> bool {
        !matches!(self, Self::NoShortage | Self::Arrived)
    }
}

wire_enum!(
    RequestStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
    }
);

use rust_decimal::Decimal;
use serde::Serialize;
use stitchline_core::{
    BackorderRejection, Capability, CoreError, OrderStatus, PaymentRejection,
};
use stitchline_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("action not permitted: {action}")]
    Unauthorized { action: &'static str },

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("outstanding balance {balance} must be settled before shipping")]
    PaymentIncomplete { balance: Decimal },

    #[error("a tracking number is required to ship")]
    TrackingRequired,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment rejected: {0}")]
    Payment(#[from] PaymentRejection),

    #[error("backorder update rejected: {0}")]
    Backorder(#[from] BackorderRejection),

    #[error("order changed concurrently: {0}")]
    StaleState(String),

    #[error("collaborator failed: {0}")]
    Collaborator(String),
}

/// Stable, machine-readable error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    OrderNotFound,
    UnauthorizedAction,
    InvalidStatusTransition,
    StockInsufficient,
    PaymentIncomplete,
    TrackingRequired,
    ValidationError,
    StaleState,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::UnauthorizedAction => "UNAUTHORIZED_ACTION",
            Self::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            Self::StockInsufficient => "STOCK_INSUFFICIENT",
            Self::PaymentIncomplete => "PAYMENT_INCOMPLETE",
            Self::TrackingRequired => "TRACKING_REQUIRED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::StaleState => "STALE_STATE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// What a caller outside the engine gets to see of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound(_) => ErrorKind::OrderNotFound,
            Self::Unauthorized { .. } => ErrorKind::UnauthorizedAction,
            Self::InvalidTransition { .. } => ErrorKind::InvalidStatusTransition,
            Self::PaymentIncomplete { .. } => ErrorKind::PaymentIncomplete,
            Self::TrackingRequired => ErrorKind::TrackingRequired,
            Self::Validation(_) | Self::Payment(_) | Self::Backorder(_) => {
                ErrorKind::ValidationError
            }
            Self::Core(CoreError::InvalidSpec(_)) => ErrorKind::ValidationError,
            Self::StaleState(_) => ErrorKind::StaleState,
            Self::Storage(_) | Self::Core(_) | Self::Collaborator(_) => ErrorKind::InternalError,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn to_api_error(&self) -> ApiError {
        let message = match self.kind() {
            ErrorKind::InternalError => "internal error".to_string(),
            _ => self.to_string(),
        };
        ApiError {
            code: self.code(),
            message,
        }
    }

    pub(crate) fn not_found(order: impl std::fmt::Display) -> Self {
        Self::OrderNotFound(order.to_string())
    }

    pub(crate) fn denied(capability: Capability) -> Self {
        Self::Unauthorized {
            action: capability.as_str(),
        }
    }

    pub(crate) fn stale(order: impl std::fmt::Display) -> Self {
        Self::StaleState(order.to_string())
    }
}

use chrono::{DateTime, NaiveDate, Utc};

use stitchline_core::{
    ids::*, AuditEntry, LineItem, Order, OrderStatus, PaymentEntry, PurchaseRequest,
    StaffDirectory, Variant,
};

use crate::error::StorageError;

/// SQL-side narrowing for order listings. Role visibility is applied by the caller.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    /// Case-insensitive substring of the job code or customer name.
    pub search: Option<String>,
    pub sales_id: Option<UserId>,
    pub include_terminal: bool,
}

/// Read access shared by the plain connection and an open write transaction.
pub trait Storage {
    fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StorageError>;

    fn find_order_by_job_code(&self, job_code: &str) -> Result<Option<Order>, StorageError>;

    /// Urgent orders first, then newest first.
    fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StorageError>;

    fn get_items(&self, order_id: OrderId) -> Result<Vec<LineItem>, StorageError>;

    fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StorageError>;

    /// Pending requests for one variant, oldest first.
    fn pending_requests_for_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Vec<PurchaseRequest>, StorageError>;

    fn requests_for_order(&self, order_id: OrderId) -> Result<Vec<PurchaseRequest>, StorageError>;

    /// Newest first.
    fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentEntry>, StorageError>;

    /// Oldest first.
    fn audit_for_order(&self, order_id: OrderId) -> Result<Vec<AuditEntry>, StorageError>;

    fn audit_log(&self) -> Result<Vec<AuditEntry>, StorageError>;

    fn staff_directory(&self) -> Result<StaffDirectory, StorageError>;

    /// Non-terminal, non-urgent orders untouched since `cutoff`.
    fn stale_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>, StorageError>;

    /// Orders waiting on goods whose expected arrival is before `today`.
    fn overdue_backorders(&self, today: NaiveDate) -> Result<Vec<OrderId>, StorageError>;

    /// Recomputes every audit hash; returns the number of entries checked.
    fn verify_audit_chain(&self) -> Result<usize, StorageError>;
}

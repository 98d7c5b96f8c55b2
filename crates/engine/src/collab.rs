//! Narrow interfaces to collaborators the engine hands work to.

use std::error::Error;

use stitchline_core::{AuditEntry, JobCode, OrderId, OrderView};

pub type CollabError = Box<dyn Error + Send + Sync>;

/// One committed audit entry offered to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub order_id: Option<OrderId>,
    pub job_code: Option<JobCode>,
    pub entry: AuditEntry,
}

impl Notification {
    pub fn is_escalation(&self) -> bool {
        self.entry.action.is_escalation()
    }
}

/// Fire-and-forget delivery; called only after the owning transaction commits.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), CollabError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), CollabError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    JobSheet,
    CustomerProof,
}

/// Produces printable documents from a fully populated snapshot.
pub trait DocumentRenderer {
    fn render(&self, kind: DocumentKind, order: &OrderView) -> Result<Vec<u8>, CollabError>;
}

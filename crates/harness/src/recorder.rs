use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use stitchline_core::AuditAction;
use stitchline_engine::{CollabError, Notification, Notifier};

/// Notifier that keeps every delivered notification, and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.delivered().iter().map(|n| n.entry.action).collect()
    }

    pub fn escalations(&self) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(Notification::is_escalation)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut d) = self.delivered.lock() {
            d.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), CollabError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("dispatcher unavailable".into());
        }
        self.delivered
            .lock()
            .map_err(|_| "recorder poisoned")?
            .push(notification.clone());
        Ok(())
    }
}

//! Periodic escalation: inactivity urgency and backorder delay rounds.
//!
//! Every order is promoted in its own transaction, so one failure is logged
//! and left for the next tick while the rest of the sweep carries on.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use stitchline_core::{backorder, ids::*, AuditAction};
use stitchline_storage::Storage;

use crate::error::EngineError;
use crate::{audit, load_order, Engine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub order_id: OrderId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub marked_urgent: Vec<OrderId>,
    /// Orders promoted one delay round, with the round reached.
    pub delayed: Vec<(OrderId, u32)>,
    pub executive_alerts: Vec<OrderId>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.marked_urgent.is_empty() && self.delayed.is_empty() && self.failures.is_empty()
    }
}

impl Engine {
    /// One pass of both escalation checks. Safe to re-run.
    pub fn sweep(&mut self) -> Result<SweepReport, EngineError> {
        let now = self.now();
        let today = self.clock().today();
        let cutoff = now - self.config().inactivity_threshold();
        let mut report = SweepReport::default();

        for order_id in self.storage.stale_orders(cutoff)? {
            match self.escalate_inactive(order_id, cutoff, now) {
                Ok(true) => report.marked_urgent.push(order_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "inactivity escalation failed");
                    report.failures.push(SweepFailure {
                        order_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        for order_id in self.storage.overdue_backorders(today)? {
            match self.promote_overdue(order_id, today, now) {
                Ok(Some((round, alerted))) => {
                    report.delayed.push((order_id, round));
                    if alerted {
                        report.executive_alerts.push(order_id);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "backorder delay promotion failed");
                    report.failures.push(SweepFailure {
                        order_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.is_quiet() {
            debug!("escalation sweep found nothing to do");
        } else {
            info!(
                marked_urgent = report.marked_urgent.len(),
                delayed = report.delayed.len(),
                executive_alerts = report.executive_alerts.len(),
                failures = report.failures.len(),
                "escalation sweep finished"
            );
        }
        Ok(report)
    }

    fn escalate_inactive(
        &mut self,
        order_id: OrderId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let days = self.config().inactivity_days;
        let note = format!("no activity for {days} days");
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        if !tx.escalate_stale(order_id, cutoff, &note)? {
            return Ok(false);
        }
        audit(&tx, &mut outbox, Some(&order), None, AuditAction::InactivityEscalated, note, now)?;
        tx.commit()?;
        info!(order_id = %order_id, job_code = %order.job_code, "order escalated for inactivity");
        self.dispatch(outbox);
        Ok(true)
    }

    /// Returns the round reached and whether an executive alert was raised.
    fn promote_overdue(
        &mut self,
        order_id: OrderId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<(u32, bool)>, EngineError> {
        let alert_round = self.config().executive_alert_round;
        let mut outbox = Vec::new();
        let tx = self.storage.begin()?;
        let order = load_order(&tx, order_id)?;
        if order.status.is_terminal() {
            return Ok(None);
        }
        let Some(promotion) = backorder::overdue_promotion(&order.backorder, today) else {
            return Ok(None);
        };
        if !tx.advance_backorder(order_id, order.backorder.status, promotion.to)? {
            return Ok(None);
        }
        audit(
            &tx,
            &mut outbox,
            Some(&order),
            None,
            AuditAction::BackorderDelayed,
            format!("expected arrival {} missed, delay round {}", promotion.eta, promotion.round),
            now,
        )?;
        let alerted = promotion.round >= alert_round;
        if alerted {
            audit(
                &tx,
                &mut outbox,
                Some(&order),
                None,
                AuditAction::ExecutiveAlert,
                format!(
                    "backorder for {} delayed {} times, last expected {}",
                    order.job_code, promotion.round, promotion.eta
                ),
                now,
            )?;
        }
        tx.commit()?;
        info!(
            order_id = %order_id,
            job_code = %order.job_code,
            round = promotion.round,
            alerted,
            "backorder delay promoted"
        );
        self.dispatch(outbox);
        Ok(Some((promotion.round, alerted)))
    }
}

/// Runs [`Engine::sweep`] on its own thread every `sweep_interval_secs`
/// until stopped.
pub struct EscalationSweeper {
    stop: Sender<()>,
    handle: JoinHandle<Engine>,
}

impl EscalationSweeper {
    /// Moves `engine` onto a background thread; the first sweep runs at once.
    pub fn spawn(engine: Engine) -> std::io::Result<Self> {
        let (stop, shutdown) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("escalation-sweeper".into())
            .spawn(move || run(engine, shutdown))?;
        Ok(Self { stop, handle })
    }

    /// Signals the loop and hands the engine back once it has exited.
    pub fn stop(self) -> Option<Engine> {
        let _ = self.stop.send(());
        self.handle.join().ok()
    }
}

fn run(mut engine: Engine, shutdown: Receiver<()>) -> Engine {
    let interval = engine.config().sweep_interval();
    info!(interval_secs = interval.as_secs(), "escalation sweeper started");
    loop {
        if let Err(e) = engine.sweep() {
            error!(error = %e, "escalation sweep failed, retrying next tick");
        }
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("escalation sweeper stopped");
    engine
}

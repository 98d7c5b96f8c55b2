//! Backorder sub-state policy and FIFO goods-receipt allocation.

use chrono::NaiveDate;
use thiserror::Error;

use crate::ids::PurchaseRequestId;
use crate::order::{BackorderState, PurchaseRequest};
use crate::status::{BackorderStatus, RequestStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackorderRejection {
    #[error("expected arrival {eta} is in the past")]
    EtaInPast { eta: NaiveDate },
    #[error("expected arrival may be set at most {max} times")]
    RevisionLimit { max: u32 },
    #[error("goods for this order have already arrived")]
    AlreadyArrived,
}

/// Applies a new expected-arrival date.
///
/// Returns `Ok(None)` when `eta` equals the date already on record; that is
/// not counted as a revision.
pub fn apply_eta(
    current: &BackorderState,
    eta: NaiveDate,
    today: NaiveDate,
    max_revisions: u32,
) -> Result<Option<BackorderState>, BackorderRejection> {
    if current.status == BackorderStatus::Arrived {
        return Err(BackorderRejection::AlreadyArrived);
    }
    if eta < today {
        return Err(BackorderRejection::EtaInPast { eta });
    }
    if current.eta == Some(eta) {
        return Ok(None);
    }
    if current.eta_revisions >= max_revisions {
        return Err(BackorderRejection::RevisionLimit { max: max_revisions });
    }
    let status = match current.status {
        BackorderStatus::DelayedRound1
        | BackorderStatus::DelayedRound2
        | BackorderStatus::WaitingArrivalRevised => BackorderStatus::WaitingArrivalRevised,
        _ => BackorderStatus::WaitingArrival,
    };
    Ok(Some(BackorderState {
        status,
        eta: Some(eta),
        eta_revisions: current.eta_revisions + 1,
        reason: current.reason.clone(),
    }))
}

/// A single delay-round promotion the sweeper should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPromotion {
    pub to: BackorderStatus,
    pub round: u32,
    pub eta: NaiveDate,
}

/// Promotes a missed waiting-arrival state by exactly one round.
pub fn overdue_promotion(state: &BackorderState, today: NaiveDate) -> Option<DelayPromotion> {
    let eta = state.eta?;
    if eta >= today {
        return None;
    }
    let (to, round) = match state.status {
        BackorderStatus::WaitingArrival => (BackorderStatus::DelayedRound1, 1),
        BackorderStatus::WaitingArrivalRevised => (BackorderStatus::DelayedRound2, 2),
        _ => return None,
    };
    Some(DelayPromotion { to, round, eta })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub fulfilled: Vec<PurchaseRequestId>,
    pub consumed: u32,
}

impl Allocation {
    pub fn leftover(&self, received: u32) -> u32 {
        received.saturating_sub(self.consumed)
    }
}

/// Covers pending requests oldest first, stopping at the first one the
/// remaining quantity cannot cover in full. Requests are never split.
pub fn allocate_receipt(received: u32, pending: &[PurchaseRequest]) -> Allocation {
    let mut ordered: Vec<&PurchaseRequest> = pending
        .iter()
        .filter(|r| r.status == RequestStatus::Pending)
        .collect();
    ordered.sort_by_key(|r| (r.created_at, r.id));

    let mut allocation = Allocation::default();
    let mut remaining = received;
    for request in ordered {
        if request.quantity > remaining {
            break;
        }
        remaining -= request.quantity;
        allocation.consumed += request.quantity;
        allocation.fulfilled.push(request.id);
    }
    allocation
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::ids::{OrderId, VariantId};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn waiting_input() -> BackorderState {
        BackorderState {
            status: BackorderStatus::WaitingInput,
            ..BackorderState::default()
        }
    }

    #[test]
    fn eta_initial_then_single_revision() {
        let first = apply_eta(&waiting_input(), day(10), day(5), 2).unwrap().unwrap();
        assert_eq!(first.status, BackorderStatus::WaitingArrival);
        assert_eq!(first.eta_revisions, 1);

        assert_eq!(apply_eta(&first, day(10), day(5), 2), Ok(None));

        let second = apply_eta(&first, day(12), day(5), 2).unwrap().unwrap();
        assert_eq!(second.eta_revisions, 2);

        assert_eq!(
            apply_eta(&second, day(14), day(5), 2),
            Err(BackorderRejection::RevisionLimit { max: 2 })
        );
    }

    #[test]
    fn eta_in_past_rejected() {
        assert_eq!(
            apply_eta(&waiting_input(), day(4), day(5), 2),
            Err(BackorderRejection::EtaInPast { eta: day(4) })
        );
        assert!(apply_eta(&waiting_input(), day(5), day(5), 2).is_ok());
    }

    #[test]
    fn revising_after_delay_enters_revised_wait() {
        let delayed = BackorderState {
            status: BackorderStatus::DelayedRound1,
            eta: Some(day(3)),
            eta_revisions: 1,
            reason: None,
        };
        let next = apply_eta(&delayed, day(9), day(5), 2).unwrap().unwrap();
        assert_eq!(next.status, BackorderStatus::WaitingArrivalRevised);
    }

    #[test]
    fn overdue_promotes_one_round() {
        let mut state = BackorderState {
            status: BackorderStatus::WaitingArrival,
            eta: Some(day(3)),
            eta_revisions: 1,
            reason: None,
        };
        assert_eq!(overdue_promotion(&state, day(3)), None);
        let p = overdue_promotion(&state, day(4)).unwrap();
        assert_eq!((p.to, p.round), (BackorderStatus::DelayedRound1, 1));

        state.status = p.to;
        assert_eq!(overdue_promotion(&state, day(20)), None);

        state.status = BackorderStatus::WaitingArrivalRevised;
        let p = overdue_promotion(&state, day(4)).unwrap();
        assert_eq!((p.to, p.round), (BackorderStatus::DelayedRound2, 2));
    }

    fn request(qty: u32, minutes: i64) -> PurchaseRequest {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        PurchaseRequest {
            id: PurchaseRequestId::new(),
            order_id: OrderId::new(),
            variant_id: VariantId::new(),
            quantity: qty,
            status: RequestStatus::Pending,
            created_at: base + TimeDelta::minutes(minutes),
        }
    }

    #[test]
    fn fifo_stops_at_first_uncoverable() {
        let a = request(4, 0);
        let b = request(5, 1);
        let c = request(1, 2);
        let pending = vec![c.clone(), a.clone(), b.clone()];

        let alloc = allocate_receipt(6, &pending);
        assert_eq!(alloc.fulfilled, vec![a.id]);
        assert_eq!(alloc.consumed, 4);
        assert_eq!(alloc.leftover(6), 2);

        let alloc = allocate_receipt(10, &pending);
        assert_eq!(alloc.fulfilled, vec![a.id, b.id, c.id]);
        assert_eq!(alloc.leftover(10), 0);

        let alloc = allocate_receipt(3, &pending);
        assert!(alloc.fulfilled.is_empty());
    }

    #[test]
    fn completed_requests_are_skipped() {
        let mut done = request(2, 0);
        done.status = RequestStatus::Completed;
        let open = request(2, 1);
        let alloc = allocate_receipt(2, &[done, open.clone()]);
        assert_eq!(alloc.fulfilled, vec![open.id]);
    }
}

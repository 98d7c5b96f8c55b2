//! Payment entries and the balance fold behind the shipment gate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::Financials;
use crate::status::PaymentMethod;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub evidence_ref: Option<String>,
    pub note: Option<String>,
}

impl PaymentRequest {
    pub fn transfer(amount: Decimal, evidence_ref: impl Into<String>) -> Self {
        Self {
            amount,
            method: PaymentMethod::Transfer,
            evidence_ref: Some(evidence_ref.into()),
            note: None,
        }
    }

    pub fn cash_on_delivery(amount: Decimal) -> Self {
        Self {
            amount,
            method: PaymentMethod::CashOnDelivery,
            evidence_ref: None,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn has_evidence(&self) -> bool {
        self.evidence_ref
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentRejection {
    #[error("payment amount must be positive")]
    NonPositiveAmount,
    #[error("order is already fully paid")]
    AlreadySettled,
    #[error("amount {amount} exceeds outstanding balance {balance}")]
    ExceedsBalance { amount: Decimal, balance: Decimal },
    #[error("transfer payments need a slip reference")]
    MissingEvidence,
    #[error("paid amount would exceed the representable range")]
    AmountOverflow,
}

/// Checks a payment against the order's current financial snapshot.
pub fn validate_payment(
    financials: &Financials,
    request: &PaymentRequest,
) -> Result<(), PaymentRejection> {
    if request.amount <= Decimal::ZERO {
        return Err(PaymentRejection::NonPositiveAmount);
    }
    if financials.paid_amount.checked_add(request.amount).is_none() {
        return Err(PaymentRejection::AmountOverflow);
    }
    if request.method == PaymentMethod::Transfer {
        let balance = financials.balance_due();
        if balance <= Decimal::ZERO {
            return Err(PaymentRejection::AlreadySettled);
        }
        if request.amount > balance {
            return Err(PaymentRejection::ExceedsBalance {
                amount: request.amount,
                balance,
            });
        }
        if !request.has_evidence() {
            return Err(PaymentRejection::MissingEvidence);
        }
    }
    Ok(())
}

/// Paid amount as the legacy deposit plus every recorded entry.
pub fn fold_paid(
    legacy_deposit: Decimal,
    entries: impl IntoIterator<Item = Decimal>,
) -> Result<Decimal, PaymentRejection> {
    entries
        .into_iter()
        .try_fold(legacy_deposit, |acc, amount| acc.checked_add(amount))
        .ok_or(PaymentRejection::AmountOverflow)
}

/// Financial snapshot after appending an accepted payment.
pub fn apply_payment(
    financials: &Financials,
    request: &PaymentRequest,
) -> Result<Financials, PaymentRejection> {
    let paid_amount = financials
        .paid_amount
        .checked_add(request.amount)
        .ok_or(PaymentRejection::AmountOverflow)?;
    Ok(Financials {
        paid_amount,
        payment_method: request.method,
        ..financials.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PaymentStatus;

    fn financials(total: i64, paid: i64, method: PaymentMethod) -> Financials {
        Financials {
            total_price: Decimal::from(total),
            paid_amount: Decimal::from(paid),
            legacy_deposit: Decimal::ZERO,
            payment_method: method,
        }
    }

    #[test]
    fn balance_never_negative() {
        let f = financials(1000, 1200, PaymentMethod::Transfer);
        assert_eq!(f.balance_due(), Decimal::ZERO);
        assert_eq!(f.payment_status(), PaymentStatus::Paid);
        let f = financials(1000, 400, PaymentMethod::Transfer);
        assert_eq!(f.balance_due(), Decimal::from(600));
        assert_eq!(f.payment_status(), PaymentStatus::Partial);
        let f = financials(1000, 0, PaymentMethod::Transfer);
        assert_eq!(f.payment_status(), PaymentStatus::Unpaid);
    }

    #[test]
    fn transfer_rules() {
        let f = financials(1000, 500, PaymentMethod::Transfer);
        assert_eq!(
            validate_payment(&f, &PaymentRequest::transfer(Decimal::from(600), "slip://1")),
            Err(PaymentRejection::ExceedsBalance {
                amount: Decimal::from(600),
                balance: Decimal::from(500),
            })
        );
        let mut missing = PaymentRequest::transfer(Decimal::from(100), "  ");
        assert_eq!(validate_payment(&f, &missing), Err(PaymentRejection::MissingEvidence));
        missing.evidence_ref = None;
        assert_eq!(validate_payment(&f, &missing), Err(PaymentRejection::MissingEvidence));
        assert!(validate_payment(&f, &PaymentRequest::transfer(Decimal::from(500), "slip://2")).is_ok());

        let settled = financials(1000, 1000, PaymentMethod::Transfer);
        assert_eq!(
            validate_payment(&settled, &PaymentRequest::transfer(Decimal::ONE, "slip://3")),
            Err(PaymentRejection::AlreadySettled)
        );
    }

    #[test]
    fn cod_needs_only_an_amount() {
        let f = financials(1000, 0, PaymentMethod::Transfer);
        let cod = PaymentRequest::cash_on_delivery(Decimal::from(1000));
        assert!(validate_payment(&f, &cod).is_ok());
        assert_eq!(
            validate_payment(&f, &PaymentRequest::cash_on_delivery(Decimal::ZERO)),
            Err(PaymentRejection::NonPositiveAmount)
        );
        let after = apply_payment(&f, &cod).unwrap();
        assert_eq!(after.balance_due(), Decimal::ZERO);
        assert_eq!(after.payment_method, PaymentMethod::CashOnDelivery);
        assert!(after.clears_shipment());
    }

    #[test]
    fn gate_blocks_owed_transfer() {
        assert!(!financials(1000, 500, PaymentMethod::Transfer).clears_shipment());
        assert!(financials(1000, 500, PaymentMethod::CashOnDelivery).clears_shipment());
        assert!(financials(1000, 1000, PaymentMethod::Transfer).clears_shipment());
    }

    #[test]
    fn fold_includes_legacy_deposit() {
        let paid = fold_paid(Decimal::from(200), [Decimal::from(300), Decimal::from(50)]);
        assert_eq!(paid, Ok(Decimal::from(550)));
        assert_eq!(fold_paid(Decimal::ZERO, Vec::<Decimal>::new()), Ok(Decimal::ZERO));
    }

    #[test]
    fn cod_past_decimal_range_is_rejected() {
        let f = financials(1000, 0, PaymentMethod::CashOnDelivery);
        let huge = PaymentRequest::cash_on_delivery(Decimal::MAX);
        assert!(validate_payment(&f, &huge).is_ok());
        let after = apply_payment(&f, &huge).unwrap();
        assert_eq!(validate_payment(&after, &huge), Err(PaymentRejection::AmountOverflow));
        assert_eq!(apply_payment(&after, &huge), Err(PaymentRejection::AmountOverflow));
        assert_eq!(
            fold_paid(Decimal::MAX, [Decimal::ONE]),
            Err(PaymentRejection::AmountOverflow)
        );
    }
}

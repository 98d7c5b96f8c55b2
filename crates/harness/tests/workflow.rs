use chrono::TimeDelta;
use rust_decimal::Decimal;
use stitchline_core::{
    ids::*, Actor, AuditAction, Capability, Department, OrderStatus, PaymentRequest, QcTally, Role,
};
use stitchline_engine::{NewOrder, QcFailure, ScanKind, TransitionRequest};
use stitchline_harness::{init_tracing, TestShop};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn shop_with_order() -> Result<(TestShop, OrderId), Box<dyn std::error::Error>> {
    init_tracing();
    let mut shop = TestShop::new()?;
    let polo = shop.stock_variant("POLO-NAVY-L", 100)?;
    let created = shop.order_for(polo, 10, 250)?;
    Ok((shop, created.order.id))
}

// ============================================================================
// Forward path
// ============================================================================

#[test]
fn new_order_starts_pending_artwork_with_job_code() -> TestResult {
    let (shop, order_id) = shop_with_order()?;
    let view = shop.engine.get_order(&shop.crew.sales, order_id)?;

    assert_eq!(view.status, OrderStatus::PendingArtwork);
    assert_eq!(view.job_code.as_str(), "SA/20260302-001");
    assert!(view.assignees.iter().all(|a| a.worker.is_none()));
    Ok(())
}

#[test]
fn graphic_claim_advances_to_designing() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let graphic = shop.crew.graphic.clone();

    let view = shop.engine.claim(&graphic, order_id)?;
    assert_eq!(view.status, OrderStatus::Designing);
    let slot = view
        .assignees
        .iter()
        .find(|a| a.department == Department::Graphic)
        .and_then(|a| a.worker.clone());
    assert_eq!(slot.and_then(|w| w.id), Some(graphic.id));

    // One entry for the combined claim and status change.
    let trail = shop.engine.audit_trail(&shop.crew.admin, order_id)?;
    let claims: Vec<_> = trail
        .iter()
        .filter(|e| e.action == AuditAction::TaskClaimed)
        .collect();
    assert_eq!(claims.len(), 1);
    assert!(claims[0].detail.contains("PENDING_ARTWORK -> DESIGNING"));
    assert_eq!(trail.len(), 2);
    Ok(())
}

#[test]
fn full_path_to_completed() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let finance = shop.crew.finance.clone();
    shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(Decimal::from(2500), "slips/0001.jpg"),
    )?;

    let view = shop.walk_to(order_id, OrderStatus::Completed)?;
    assert_eq!(view.status, OrderStatus::Completed);
    assert_eq!(view.tracking_no.as_deref(), Some("TH1234567890"));
    assert!(!view.capabilities.contains(Capability::Cancel));
    Ok(())
}

#[test]
fn every_transition_writes_one_audit_entry() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let admin = shop.crew.admin.clone();
    shop.walk_to(order_id, OrderStatus::Designing)?;

    let before = shop.engine.audit_trail(&admin, order_id)?.len();
    let graphic = shop.crew.graphic.clone();
    shop.engine.transition(
        &graphic,
        order_id,
        TransitionRequest::to(OrderStatus::PendingStockCheck),
    )?;
    let trail = shop.engine.audit_trail(&admin, order_id)?;
    assert_eq!(trail.len(), before + 1);
    let last = trail.last().ok_or("empty trail")?;
    assert_eq!(last.action, AuditAction::StatusChanged);
    assert_eq!(last.detail, "DESIGNING -> PENDING_STOCK_CHECK");
    Ok(())
}

#[test]
fn stock_issue_then_resolution() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::PendingStockCheck)?;
    let stock = shop.crew.stock.clone();

    shop.engine.claim(&stock, order_id)?;
    let view = shop.engine.transition(&stock, order_id, TransitionRequest::to(OrderStatus::StockIssue))?;
    assert_eq!(view.status, OrderStatus::StockIssue);

    let view = shop.engine.transition(
        &stock,
        order_id,
        TransitionRequest::to(OrderStatus::StockRechecked),
    )?;
    assert_eq!(view.status, OrderStatus::StockRechecked);
    Ok(())
}

// ============================================================================
// Rejections leave the order untouched
// ============================================================================

#[test]
fn undefined_edge_is_rejected_without_mutation() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let admin = shop.crew.admin.clone();
    let before = shop.engine.audit_trail(&admin, order_id)?.len();

    let err = shop
        .engine
        .transition(&admin, order_id, TransitionRequest::to(OrderStatus::QcPassed))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
    assert_eq!(shop.status_of(order_id)?, OrderStatus::PendingArtwork);
    assert_eq!(shop.engine.audit_trail(&admin, order_id)?.len(), before);
    Ok(())
}

#[test]
fn wrong_department_cannot_move_order() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::Designing)?;
    let production = shop.crew.production.clone();

    let err = shop
        .engine
        .transition(
            &production,
            order_id,
            TransitionRequest::to(OrderStatus::PendingStockCheck),
        )
        .unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED_ACTION");
    assert_eq!(shop.status_of(order_id)?, OrderStatus::Designing);
    Ok(())
}

#[test]
fn unknown_order_is_not_found() -> TestResult {
    let (mut shop, _) = shop_with_order()?;
    let admin = shop.crew.admin.clone();

    let err = shop.engine.get_order(&admin, OrderId::new()).unwrap_err();
    assert_eq!(err.code(), "ORDER_NOT_FOUND");
    let err = shop
        .engine
        .transition(&admin, OrderId::new(), TransitionRequest::to(OrderStatus::Cancelled))
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_NOT_FOUND");
    Ok(())
}

// ============================================================================
// Shipment gate
// ============================================================================

#[test]
fn shipping_with_balance_due_is_refused() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let finance = shop.crew.finance.clone();
    let delivery = shop.crew.delivery.clone();
    shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(Decimal::from(2000), "slips/0002.jpg"),
    )?;
    shop.walk_to(order_id, OrderStatus::ReadyToShip)?;

    let err = shop
        .engine
        .transition(
            &delivery,
            order_id,
            TransitionRequest::to(OrderStatus::Completed).with_tracking("TH000111"),
        )
        .unwrap_err();
    assert_eq!(err.code(), "PAYMENT_INCOMPLETE");
    assert!(err.to_string().contains("500"));
    assert_eq!(shop.status_of(order_id)?, OrderStatus::ReadyToShip);
    Ok(())
}

#[test]
fn shipping_needs_tracking_number() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let finance = shop.crew.finance.clone();
    let delivery = shop.crew.delivery.clone();
    shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(Decimal::from(2500), "slips/0003.jpg"),
    )?;
    shop.walk_to(order_id, OrderStatus::ReadyToShip)?;

    let err = shop
        .engine
        .transition(
            &delivery,
            order_id,
            TransitionRequest::to(OrderStatus::Completed).with_tracking("   "),
        )
        .unwrap_err();
    assert_eq!(err.code(), "TRACKING_REQUIRED");
    assert_eq!(shop.status_of(order_id)?, OrderStatus::ReadyToShip);
    Ok(())
}

#[test]
fn cash_on_delivery_ships_with_balance() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let sales = shop.crew.sales.clone();
    shop.engine.record_payment(
        &sales,
        order_id,
        PaymentRequest::cash_on_delivery(Decimal::from(1000)),
    )?;
    shop.walk_to(order_id, OrderStatus::ReadyToShip)?;

    let delivery = shop.crew.delivery.clone();
    let view = shop.engine.transition(
        &delivery,
        order_id,
        TransitionRequest::to(OrderStatus::Completed).with_tracking("KERRY-55"),
    )?;
    assert_eq!(view.status, OrderStatus::Completed);
    Ok(())
}

// ============================================================================
// QC back-edges
// ============================================================================

#[test]
fn qc_fail_returns_to_graphic() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::ProductionFinished)?;
    let qc = shop.crew.qc.clone();
    let admin = shop.crew.admin.clone();
    shop.engine.claim(&qc, order_id)?;
    let before = shop.engine.audit_trail(&admin, order_id)?.len();

    let view = shop
        .engine
        .fail_qc(&qc, order_id, QcFailure::new(Department::Graphic, "logo colour is off"))?;
    assert_eq!(view.status, OrderStatus::Designing);

    let trail = shop.engine.audit_trail(&admin, order_id)?;
    assert_eq!(trail.len(), before + 1);
    let last = trail.last().ok_or("empty trail")?;
    assert_eq!(last.action, AuditAction::QcFailed);
    assert!(last.detail.contains("logo colour is off"));
    Ok(())
}

#[test]
fn qc_fail_returns_to_production_keeping_start_time() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::ProductionFinished)?;
    let qc = shop.crew.qc.clone();
    let production = shop.crew.production.clone();
    let started = shop
        .engine
        .get_order(&production, order_id)?
        .technical
        .and_then(|t| t.production_started_at)
        .ok_or("start time missing")?;

    shop.clock.advance(TimeDelta::hours(5));
    shop.engine.claim(&qc, order_id)?;
    let view = shop
        .engine
        .fail_qc(
            &qc,
            order_id,
            QcFailure::new(Department::Production, "loose stitching on sleeve"),
        )?;
    assert_eq!(view.status, OrderStatus::InProduction);

    let again = shop
        .engine
        .get_order(&production, order_id)?
        .technical
        .and_then(|t| t.production_started_at);
    assert_eq!(again, Some(started));

    let trail = shop.engine.audit_trail(&shop.crew.admin, order_id)?;
    let last = trail.last().ok_or("empty trail")?;
    assert!(last.detail.contains("loose stitching on sleeve"));
    Ok(())
}

#[test]
fn qc_fail_needs_reason_and_valid_department() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::ProductionFinished)?;
    let qc = shop.crew.qc.clone();
    shop.engine.claim(&qc, order_id)?;

    let err = shop
        .engine
        .fail_qc(&qc, order_id, QcFailure::new(Department::Graphic, ""))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    let err = shop
        .engine
        .fail_qc(&qc, order_id, QcFailure::new(Department::Stock, "wrong fabric"))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(shop.status_of(order_id)?, OrderStatus::ProductionFinished);

    let view = shop.engine.get_order(&qc, order_id)?;
    assert_eq!(view.technical.map(|t| t.qc), Some(QcTally::default()));
    Ok(())
}

#[test]
fn repeated_qc_failures_accumulate_counts() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let qc = shop.crew.qc.clone();
    let admin = shop.crew.admin.clone();

    shop.walk_to(order_id, OrderStatus::ProductionFinished)?;
    shop.engine.claim(&qc, order_id)?;
    shop.engine.fail_qc(
        &qc,
        order_id,
        QcFailure::new(Department::Production, "uneven satin fill").with_damaged(2),
    )?;
    let first = shop.engine.audit_trail(&admin, order_id)?;
    assert!(first
        .last()
        .is_some_and(|e| e.detail == "returned to IN_PRODUCTION: uneven satin fill (damaged 2)"));

    shop.walk_to(order_id, OrderStatus::ProductionFinished)?;
    let view = shop.engine.fail_qc(
        &qc,
        order_id,
        QcFailure::new(Department::Graphic, "club crest is last season's")
            .with_damaged(3)
            .sales_error(),
    )?;
    assert_eq!(view.status, OrderStatus::Designing);
    assert_eq!(
        view.technical.map(|t| t.qc),
        Some(QcTally {
            rejections: 2,
            damaged: 5
        })
    );

    let trail = shop.engine.audit_trail(&admin, order_id)?;
    let last = trail.last().ok_or("empty trail")?;
    assert_eq!(last.action, AuditAction::QcFailed);
    assert!(last.detail.ends_with("(damaged 3, sales error)"));
    Ok(())
}

// ============================================================================
// Payment reminders
// ============================================================================

#[test]
fn finishing_with_transfer_balance_sends_reminder() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::InProduction)?;
    shop.notifier.clear();

    let production = shop.crew.production.clone();
    shop.engine.transition(
        &production,
        order_id,
        TransitionRequest::to(OrderStatus::ProductionFinished),
    )?;
    assert_eq!(
        shop.notifier.actions(),
        vec![AuditAction::StatusChanged, AuditAction::PaymentReminder]
    );

    let trail = shop.engine.audit_trail(&shop.crew.admin, order_id)?;
    let reminder = trail.last().ok_or("empty trail")?;
    assert_eq!(reminder.action, AuditAction::PaymentReminder);
    assert_eq!(reminder.actor, "System");
    assert!(reminder.detail.contains("2500"));
    Ok(())
}

#[test]
fn finish_scan_also_sends_reminder() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::InProduction)?;
    shop.notifier.clear();

    let production = shop.crew.production.clone();
    shop.engine.production_scan(&production, order_id, ScanKind::Complete)?;
    assert_eq!(
        shop.notifier.actions(),
        vec![AuditAction::ProductionScan, AuditAction::PaymentReminder]
    );

    // A repeated scan does not remind again.
    shop.notifier.clear();
    shop.engine.production_scan(&production, order_id, ScanKind::Complete)?;
    assert_eq!(shop.notifier.actions(), vec![AuditAction::ProductionScan]);
    Ok(())
}

#[test]
fn settled_and_cod_orders_get_no_reminder() -> TestResult {
    let (mut shop, paid) = shop_with_order()?;
    let polo = shop.stock_variant("POLO-WHITE-M", 50)?;
    let cod = shop.order_for(polo, 4, 250)?.order.id;
    let finance = shop.crew.finance.clone();
    let sales = shop.crew.sales.clone();
    shop.engine.record_payment(
        &finance,
        paid,
        PaymentRequest::transfer(Decimal::from(2500), "slips/0009.jpg"),
    )?;
    shop.engine.record_payment(
        &sales,
        cod,
        PaymentRequest::cash_on_delivery(Decimal::from(1000)),
    )?;

    shop.walk_to(paid, OrderStatus::ProductionFinished)?;
    shop.walk_to(cod, OrderStatus::ProductionFinished)?;
    let actions = shop.notifier.actions();
    assert!(!actions.contains(&AuditAction::PaymentReminder));
    Ok(())
}

// ============================================================================
// Outdated callers
// ============================================================================

#[test]
fn transition_from_outdated_status_is_stale() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::PendingStockCheck)?;
    let stock = shop.crew.stock.clone();
    let admin = shop.crew.admin.clone();
    shop.engine.claim(&stock, order_id)?;
    shop.engine.transition(&stock, order_id, TransitionRequest::to(OrderStatus::StockIssue))?;
    let before = shop.engine.audit_trail(&admin, order_id)?.len();

    // The caller still believes the order awaits its stock check. Without the
    // expectation this request would quietly resolve the issue instead.
    let err = shop
        .engine
        .transition(
            &stock,
            order_id,
            TransitionRequest::to(OrderStatus::StockRechecked)
                .expecting(OrderStatus::PendingStockCheck),
        )
        .unwrap_err();
    assert_eq!(err.code(), "STALE_STATE");
    assert_eq!(shop.status_of(order_id)?, OrderStatus::StockIssue);
    assert_eq!(shop.engine.audit_trail(&admin, order_id)?.len(), before);

    let view = shop.engine.transition(
        &stock,
        order_id,
        TransitionRequest::to(OrderStatus::StockRechecked).expecting(OrderStatus::StockIssue),
    )?;
    assert_eq!(view.status, OrderStatus::StockRechecked);
    Ok(())
}

// ============================================================================
// Job codes
// ============================================================================

#[test]
fn salespeople_without_codes_get_their_own_prefix() -> TestResult {
    let (mut shop, _) = shop_with_order()?;
    let polo = shop.stock_variant("POLO-RED-S", 50)?;
    let pim = Actor::new("Pim", Role::Sales);
    let kai = Actor::new("Kai", Role::Sales);

    let mut prefixes = Vec::new();
    for seller in [&pim, &kai] {
        let order = NewOrder::new("Lanna Runners", "053-111-222")
            .item(polo, 2, Decimal::from(300));
        let created = shop.engine.create_order(seller, order)?;
        let code = created.order.job_code.as_str().to_string();
        let (prefix, _) = code.split_once('/').ok_or("job code without prefix")?;
        prefixes.push(prefix.to_string());
    }
    assert_eq!(prefixes[0], pim.job_prefix());
    assert_eq!(prefixes[1], kai.job_prefix());
    assert_ne!(prefixes[0], prefixes[1]);
    Ok(())
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn creator_cancels_with_reason() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let sales = shop.crew.sales.clone();

    let err = shop.engine.cancel(&sales, order_id, " ").unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let view = shop.engine.cancel(&sales, order_id, "customer changed supplier")?;
    assert_eq!(view.status, OrderStatus::Cancelled);

    let trail = shop.engine.audit_trail(&shop.crew.admin, order_id)?;
    let last = trail.last().ok_or("empty trail")?;
    assert_eq!(last.action, AuditAction::OrderCancelled);
    assert!(last.detail.contains("customer changed supplier"));

    let err = shop.engine.cancel(&sales, order_id, "again").unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
    Ok(())
}

#[test]
fn sales_cannot_cancel_mid_production_but_admin_can() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::InProduction)?;
    let sales = shop.crew.sales.clone();
    let admin = shop.crew.admin.clone();

    let err = shop.engine.cancel(&sales, order_id, "too slow").unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED_ACTION");

    let view = shop.engine.cancel(&admin, order_id, "duplicate order")?;
    assert_eq!(view.status, OrderStatus::Cancelled);
    Ok(())
}

// ============================================================================
// Production scans
// ============================================================================

#[test]
fn repeated_scans_never_reset_timestamps() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::StockRechecked)?;
    let production = shop.crew.production.clone();

    let first = shop.engine.production_scan(&production, order_id, ScanKind::Start)?;
    assert!(first.advanced);
    assert_eq!(first.order.status, OrderStatus::InProduction);
    let started = first.order.technical.as_ref().and_then(|t| t.production_started_at);
    assert_eq!(started, Some(shop.now()));

    shop.clock.advance(TimeDelta::minutes(40));
    let repeat = shop.engine.production_scan(&production, order_id, ScanKind::Start)?;
    assert!(!repeat.advanced);
    assert_eq!(
        repeat.order.technical.as_ref().and_then(|t| t.production_started_at),
        started
    );

    let done = shop.engine.production_scan(&production, order_id, ScanKind::Complete)?;
    assert!(done.advanced);
    assert_eq!(done.order.status, OrderStatus::ProductionFinished);
    let completed = done.order.technical.as_ref().and_then(|t| t.production_completed_at);
    assert_eq!(completed, Some(shop.now()));

    shop.clock.advance(TimeDelta::minutes(5));
    let repeat = shop.engine.production_scan(&production, order_id, ScanKind::Complete)?;
    assert!(!repeat.advanced);
    assert_eq!(
        repeat.order.technical.as_ref().and_then(|t| t.production_completed_at),
        completed
    );
    Ok(())
}

#[test]
fn scan_before_stock_check_is_rejected() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let production = shop.crew.production.clone();

    let err = shop
        .engine
        .production_scan(&production, order_id, ScanKind::Start)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
    Ok(())
}

#[test]
fn audit_chain_verifies_after_workflow() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    shop.walk_to(order_id, OrderStatus::QcPassed)?;
    let entries = shop.engine.verify_audit_chain()?;
    assert!(entries >= 8);
    Ok(())
}

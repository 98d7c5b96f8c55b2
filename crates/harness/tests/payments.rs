use rust_decimal::Decimal;
use stitchline_core::{ids::*, AuditAction, PaymentMethod, PaymentRequest, PaymentStatus};
use stitchline_engine::NewOrder;
use stitchline_harness::{init_tracing, TestShop};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn dec(n: i64) -> Decimal {
    Decimal::from(n)
}

fn shop_with_order() -> Result<(TestShop, OrderId), Box<dyn std::error::Error>> {
    init_tracing();
    let mut shop = TestShop::new()?;
    let polo = shop.stock_variant("POLO-NAVY-L", 100)?;
    let created = shop.order_for(polo, 10, 250)?;
    Ok((shop, created.order.id))
}

#[test]
fn transfers_fold_into_balance() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let finance = shop.crew.finance.clone();

    let outcome = shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(dec(1000), "slips/a.jpg").with_note("first instalment"),
    )?;
    let f = outcome.order.financial.ok_or("finance sees money")?;
    assert_eq!(f.paid_amount, dec(1000));
    assert_eq!(f.balance_due, dec(1500));
    assert_eq!(f.payment_status, PaymentStatus::Partial);
    assert_eq!(outcome.entry.note.as_deref(), Some("first instalment"));

    let outcome = shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(dec(1500), "slips/b.jpg"),
    )?;
    let f = outcome.order.financial.ok_or("finance sees money")?;
    assert_eq!(f.balance_due, Decimal::ZERO);
    assert_eq!(f.payment_status, PaymentStatus::Paid);
    assert_eq!(f.balance_due, (f.total_price - f.paid_amount).max(Decimal::ZERO));
    Ok(())
}

#[test]
fn transfer_rejections_in_order() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let finance = shop.crew.finance.clone();

    let over = PaymentRequest::transfer(dec(3000), "slips/over.jpg");
    let err = shop.engine.record_payment(&finance, order_id, over).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("exceeds"));

    let mut no_slip = PaymentRequest::transfer(dec(100), "");
    no_slip.evidence_ref = None;
    let err = shop.engine.record_payment(&finance, order_id, no_slip).unwrap_err();
    assert!(err.to_string().contains("slip"));

    let err = shop
        .engine
        .record_payment(&finance, order_id, PaymentRequest::transfer(dec(0), "slips/zero.jpg"))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    shop.engine.record_payment(
        &finance,
        order_id,
        PaymentRequest::transfer(dec(2500), "slips/full.jpg"),
    )?;
    let err = shop
        .engine
        .record_payment(&finance, order_id, PaymentRequest::transfer(dec(1), "slips/extra.jpg"))
        .unwrap_err();
    assert!(err.to_string().contains("fully paid"));

    let history = shop.engine.payment_history(&finance, order_id)?;
    assert_eq!(history.lines.len(), 1);
    Ok(())
}

#[test]
fn cod_declaration_counts_as_collected() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let delivery = shop.crew.delivery.clone();
    let finance = shop.crew.finance.clone();

    shop.engine.record_payment(
        &delivery,
        order_id,
        PaymentRequest::cash_on_delivery(dec(700)),
    )?;
    let history = shop.engine.payment_history(&finance, order_id)?;
    assert_eq!(history.paid_amount, dec(700));
    assert_eq!(history.balance_due, dec(1800));
    assert_eq!(history.payment_method, PaymentMethod::CashOnDelivery);

    let trail = shop.engine.audit_trail(&finance, order_id)?;
    assert_eq!(trail.last().map(|e| e.action), Some(AuditAction::CodDeclared));
    Ok(())
}

#[test]
fn legacy_deposit_and_slip_deposit() -> TestResult {
    init_tracing();
    let mut shop = TestShop::new()?;
    let polo = shop.stock_variant("POLO-NAVY-L", 100)?;
    let sales = shop.crew.sales.clone();

    let mut plain = NewOrder::new("Legacy Co", "02-000-0001").item(polo, 4, dec(250));
    plain.deposit = dec(300);
    let plain = shop.engine.create_order(&sales, plain)?;

    let history = shop.engine.payment_history(&sales, plain.order.id)?;
    assert_eq!(history.paid_amount, dec(300));
    assert_eq!(history.lines.len(), 1);
    assert!(history.lines[0].payment_id.is_none());
    assert_eq!(history.lines[0].amount, dec(300));

    // Later payments stack on the legacy amount; the legacy row stays last.
    shop.engine.record_payment(
        &sales,
        plain.order.id,
        PaymentRequest::transfer(dec(200), "slips/later.jpg"),
    )?;
    let history = shop.engine.payment_history(&sales, plain.order.id)?;
    assert_eq!(history.paid_amount, dec(500));
    assert_eq!(history.balance_due, dec(500));
    assert_eq!(history.lines.len(), 2);
    assert!(history.lines[0].payment_id.is_some());
    assert!(history.lines[1].payment_id.is_none());

    let mut slip = NewOrder::new("Slip Co", "02-000-0002").item(polo, 4, dec(250));
    slip.deposit = dec(400);
    slip.deposit_evidence = Some("slips/deposit.jpg".into());
    let slip = shop.engine.create_order(&sales, slip)?;
    let history = shop.engine.payment_history(&sales, slip.order.id)?;
    assert_eq!(history.paid_amount, dec(400));
    assert_eq!(history.lines.len(), 1);
    assert_eq!(history.lines[0].evidence_ref.as_deref(), Some("slips/deposit.jpg"));

    let mut greedy = NewOrder::new("Greedy Co", "02-000-0003").item(polo, 1, dec(100));
    greedy.deposit = dec(150);
    assert_eq!(
        shop.engine.create_order(&sales, greedy).unwrap_err().code(),
        "VALIDATION_ERROR"
    );
    Ok(())
}

#[test]
fn payment_access_is_role_gated() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let graphic = shop.crew.graphic.clone();
    let admin = shop.crew.admin.clone();

    let err = shop
        .engine
        .record_payment(&graphic, order_id, PaymentRequest::transfer(dec(10), "slips/g.jpg"))
        .unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED_ACTION");
    let err = shop.engine.payment_history(&graphic, order_id).unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED_ACTION");

    let view = shop.engine.get_order(&graphic, order_id)?;
    assert!(view.financial.is_none());
    assert!(view.items.iter().all(|i| i.unit_price.is_none()));

    shop.engine.cancel(&admin, order_id, "test")?;
    let err = shop
        .engine
        .record_payment(&admin, order_id, PaymentRequest::transfer(dec(10), "slips/c.jpg"))
        .unwrap_err();
    assert_eq!(err.code(), "UNAUTHORIZED_ACTION");
    Ok(())
}

#[test]
fn cod_beyond_decimal_range_is_refused() -> TestResult {
    let (mut shop, order_id) = shop_with_order()?;
    let delivery = shop.crew.delivery.clone();
    let finance = shop.crew.finance.clone();

    shop.engine.record_payment(
        &delivery,
        order_id,
        PaymentRequest::cash_on_delivery(Decimal::MAX),
    )?;
    let before = shop.engine.audit_trail(&finance, order_id)?.len();

    let err = shop
        .engine
        .record_payment(&delivery, order_id, PaymentRequest::cash_on_delivery(Decimal::MAX))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let history = shop.engine.payment_history(&finance, order_id)?;
    assert_eq!(history.paid_amount, Decimal::MAX);
    assert_eq!(history.lines.len(), 1);
    assert_eq!(shop.engine.audit_trail(&finance, order_id)?.len(), before);
    Ok(())
}

#[test]
fn order_total_beyond_decimal_range_is_refused() -> TestResult {
    init_tracing();
    let mut shop = TestShop::new()?;
    let polo = shop.stock_variant("POLO-NAVY-L", 100)?;
    let sales = shop.crew.sales.clone();

    let order = NewOrder::new("Siam Football Club", "081-234-5678").item(polo, 2, Decimal::MAX);
    let err = shop.engine.create_order(&sales, order).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("overflows"));

    let order = NewOrder::new("Siam Football Club", "081-234-5678")
        .item(polo, 1, Decimal::MAX)
        .item(polo, 1, Decimal::ONE);
    let err = shop.engine.create_order(&sales, order).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(shop.engine.variant_stock(polo)?, 100);
    Ok(())
}

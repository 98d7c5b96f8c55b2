use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use rust_decimal::Decimal;

use stitchline_core::{ids::*, Actor, Clock, ManualClock, OrderStatus, OrderView, Role};
use stitchline_engine::{
    CreatedOrder, Engine, EngineConfig, EngineError, NewOrder, TransitionRequest,
};

use crate::RecordingNotifier;

/// One worker per role, the way a small shop is staffed.
#[derive(Debug, Clone)]
pub struct Crew {
    pub sales: Actor,
    pub graphic: Actor,
    pub stock: Actor,
    pub production: Actor,
    pub qc: Actor,
    pub delivery: Actor,
    pub purchasing: Actor,
    pub finance: Actor,
    pub admin: Actor,
}

impl Default for Crew {
    fn default() -> Self {
        Self::new()
    }
}

impl Crew {
    pub fn new() -> Self {
        Self {
            sales: Actor::new("Nok", Role::Sales).with_department_code("SA"),
            graphic: Actor::new("Ploy", Role::Graphic),
            stock: Actor::new("Beam", Role::Stock),
            production: Actor::new("Tan", Role::Production),
            qc: Actor::new("Fah", Role::SewingQc),
            delivery: Actor::new("Golf", Role::Delivery),
            purchasing: Actor::new("Mint", Role::Purchasing),
            finance: Actor::new("Aom", Role::Finance),
            admin: Actor::new("Boss", Role::Admin),
        }
    }
}

/// An in-memory engine on a hand-driven clock, with a recording notifier.
pub struct TestShop {
    pub engine: Engine,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
    pub crew: Crew,
}

fn opening_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .map(|t| t.and_utc())
        .unwrap_or_default()
}

impl TestShop {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let clock = ManualClock::at(opening_time());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Engine::open_in_memory(config)?
            .with_clock(Arc::new(clock.clone()))
            .with_notifier(notifier.clone());
        Ok(Self {
            engine,
            clock,
            notifier,
            crew: Crew::new(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(TimeDelta::days(days));
    }

    pub fn stock_variant(&mut self, sku: &str, stock: u32) -> Result<VariantId, EngineError> {
        self.engine.register_variant(sku, stock)
    }

    /// A single-line transfer order created by the crew's salesperson.
    pub fn order_for(
        &mut self,
        variant_id: VariantId,
        quantity: u32,
        unit_price: i64,
    ) -> Result<CreatedOrder, EngineError> {
        let sales = self.crew.sales.clone();
        let order = NewOrder::new("Siam Football Club", "081-234-5678").item(
            variant_id,
            quantity,
            Decimal::from(unit_price),
        );
        self.engine.create_order(&sales, order)
    }

    pub fn status_of(&self, order_id: OrderId) -> Result<OrderStatus, EngineError> {
        Ok(self.engine.get_order(&self.crew.admin, order_id)?.status)
    }

    /// Drives the order down the forward path with the crew until it reaches
    /// `target`. Shipping needs the balance settled beforehand.
    pub fn walk_to(&mut self, order_id: OrderId, target: OrderStatus) -> Result<OrderView, EngineError> {
        let crew = self.crew.clone();
        let engine = &mut self.engine;
        let mut view = engine.get_order(&crew.admin, order_id)?;
        for _ in 0..OrderStatus::ALL.len() {
            if view.status == target {
                return Ok(view);
            }
            view = match view.status {
                OrderStatus::PendingArtwork => engine.claim(&crew.graphic, order_id)?,
                OrderStatus::Designing => engine.transition(
                    &crew.graphic,
                    order_id,
                    TransitionRequest::to(OrderStatus::PendingStockCheck),
                )?,
                OrderStatus::PendingStockCheck => {
                    engine.claim(&crew.stock, order_id)?;
                    engine.transition(
                        &crew.stock,
                        order_id,
                        TransitionRequest::to(OrderStatus::StockRechecked),
                    )?
                }
                OrderStatus::StockRechecked => engine.claim(&crew.production, order_id)?,
                OrderStatus::InProduction => engine.transition(
                    &crew.production,
                    order_id,
                    TransitionRequest::to(OrderStatus::ProductionFinished),
                )?,
                OrderStatus::ProductionFinished => {
                    engine.claim(&crew.qc, order_id)?;
                    engine.transition(&crew.qc, order_id, TransitionRequest::to(OrderStatus::QcPassed))?
                }
                OrderStatus::QcPassed => engine.transition(
                    &crew.delivery,
                    order_id,
                    TransitionRequest::to(OrderStatus::ReadyToShip),
                )?,
                OrderStatus::ReadyToShip => engine.transition(
                    &crew.delivery,
                    order_id,
                    TransitionRequest::to(OrderStatus::Completed).with_tracking("TH1234567890"),
                )?,
                OrderStatus::StockIssue => engine.transition(
                    &crew.stock,
                    order_id,
                    TransitionRequest::to(OrderStatus::StockRechecked),
                )?,
                OrderStatus::Completed | OrderStatus::Cancelled => break,
            };
        }
        if view.status == target {
            Ok(view)
        } else {
            Err(EngineError::Validation(format!(
                "could not walk order from {} to {target}",
                view.status
            )))
        }
    }
}

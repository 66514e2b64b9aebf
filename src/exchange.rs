//! The exchange-adapter contract the core consumes, plus an in-process
//! paper reference implementation so the control loop and CLI are runnable
//! without a live venue.

use crate::engine::{Balances, MinAmounts};
use crate::error::ExchangeError;
use crate::orderbook::OrderBookSnapshot;
use crate::types::{Order, OrderId, Side};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which side of the pair is base vs. quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairConvention {
    pub base: &'static str,
    pub quote: &'static str,
}

/// The contract every venue-specific adapter implements; the core only ever
/// talks to this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_orders(&self) -> Result<OrderBookSnapshot, ExchangeError>;
    async fn place_order(&self, side: Side, price: Decimal, amount: Decimal) -> Result<OrderId, ExchangeError>;
    async fn cancel_order(&self, id: &OrderId) -> Result<(), ExchangeError>;
    async fn balances(&self) -> Result<Balances, ExchangeError>;
    fn min_amounts(&self) -> (Decimal, Decimal);
    fn pair_convention(&self) -> PairConvention;

    /// Whether shutdown should cancel all resting orders.
    fn cancel_all_on_shutdown(&self) -> bool {
        false
    }

    /// Whether shutdown should withdraw all balances.
    fn withdraw_on_shutdown(&self) -> bool {
        false
    }
}

impl MinAmounts for dyn ExchangeAdapter {
    fn min_amount(&self, side: Side) -> Decimal {
        let (buy_min, sell_min) = self.min_amounts();
        match side {
            Side::Buy => buy_min,
            Side::Sell => sell_min,
        }
    }
}

/// An in-process adapter that fills orders immediately at the quoted price,
/// for demos and integration tests: a paper book kept purely in memory, no
/// network calls.
pub struct PaperExchange {
    orders: Mutex<HashMap<OrderId, Order>>,
    next_id: AtomicU64,
    balances: Mutex<Balances>,
    min_amounts: (Decimal, Decimal),
    convention: PairConvention,
}

impl PaperExchange {
    pub fn new(initial_balances: Balances, min_amounts: (Decimal, Decimal), convention: PairConvention) -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            balances: Mutex::new(initial_balances),
            min_amounts,
            convention,
        }
    }

    pub fn shared(initial_balances: Balances, min_amounts: (Decimal, Decimal), convention: PairConvention) -> Arc<Self> {
        Arc::new(Self::new(initial_balances, min_amounts, convention))
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn get_orders(&self) -> Result<OrderBookSnapshot, ExchangeError> {
        let orders = self.orders.lock().values().cloned().collect();
        Ok(OrderBookSnapshot { orders })
    }

    async fn place_order(&self, side: Side, price: Decimal, amount: Decimal) -> Result<OrderId, ExchangeError> {
        let id = format!("paper-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let order = Order::new(id.clone(), side, price, amount, amount, Utc::now());
        self.orders.lock().insert(id.clone(), order);
        Ok(id)
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<(), ExchangeError> {
        self.orders.lock().remove(id);
        Ok(())
    }

    async fn balances(&self) -> Result<Balances, ExchangeError> {
        Ok(*self.balances.lock())
    }

    fn min_amounts(&self) -> (Decimal, Decimal) {
        self.min_amounts
    }

    fn pair_convention(&self) -> PairConvention {
        self.convention
    }

    fn cancel_all_on_shutdown(&self) -> bool {
        true
    }
}

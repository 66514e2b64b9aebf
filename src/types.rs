//! Shared data-model types: `Order`, `Side`, `PriceReading`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book an order or band belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// An opaque exchange-assigned order identifier.
pub type OrderId = String;

/// A resting or tentative order.
///
/// For a buy order, `price = buy_amount / sell_amount`, interpreted as the
/// price of the sell-token denominated in the buy-token, and vice versa for
/// sell — the exchange adapter is responsible for rendering this into the
/// venue's native triple; the core only reasons in terms of `price` and
/// `amount` (the side-appropriate leg, see [`Order::amount`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: OrderId,
        side: Side,
        price: Decimal,
        buy_amount: Decimal,
        sell_amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            side,
            price,
            buy_amount,
            sell_amount,
            created_at,
        }
    }

    /// The band-relevant amount: buy-token denominated for a buy order,
    /// sell-token denominated for a sell order.
    pub fn band_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => self.buy_amount,
            Side::Sell => self.sell_amount,
        }
    }

    /// Signed fractional deviation of this order's price from `reference`:
    /// positive for asks above reference, negative for bids below.
    pub fn margin(&self, reference: Decimal) -> Decimal {
        if reference.is_zero() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Buy => (reference - self.price) / reference,
            Side::Sell => (self.price - reference) / reference,
        }
    }
}

/// A price reading plus the monotonic instant it was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReading {
    pub price: Decimal,
    pub acquired_at: DateTime<Utc>,
}

impl PriceReading {
    pub fn new(price: Decimal, acquired_at: DateTime<Utc>) -> Self {
        Self { price, acquired_at }
    }

    pub fn is_fresher_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.acquired_at <= max_age
    }
}

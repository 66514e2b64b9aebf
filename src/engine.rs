//! The cancel/place decision algorithm: composes `BandSet`,
//! the effective order book, `Limits`, and available balances into a set of
//! cancel/place intents.
//!
//! Deliberately a pure function with no I/O — decision logic stays separate
//! from the async scraping/dispatch layer that feeds it.

use crate::bands::BandSet;
use crate::limits::Limits;
use crate::types::{Order, OrderId, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Per-side available balance to fund new placements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Balances {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl Balances {
    pub fn available(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// A new order the engine wants placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrder {
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

/// The union of cancels and places emitted by one evaluation cycle. Cancels
/// always precede places in this struct's field order, matching the
/// cancel-before-place ordering guarantee the control loop must honor when
/// dispatching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub cancels: Vec<OrderId>,
    pub places: Vec<PlaceOrder>,
    /// Number of bands this cycle where the desired shortfall amount was
    /// reduced by rate-limit headroom (whether or not a reduced placement
    /// still went out).
    pub rate_limited: usize,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.cancels.is_empty() && self.places.is_empty()
    }
}

/// Exchange-side minimum order amount per side.
pub trait MinAmounts {
    fn min_amount(&self, side: Side) -> Decimal;
}

impl MinAmounts for (Decimal, Decimal) {
    fn min_amount(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.0,
            Side::Sell => self.1,
        }
    }
}

/// The stateless cancel/place decision engine.
pub struct BandEngine;

impl BandEngine {
    /// Runs one evaluation cycle. `limits` is mutated: successful placements
    /// are recorded against it.
    pub fn evaluate(
        band_set: &BandSet,
        effective_book: &[Order],
        limits: &mut Limits,
        balances: Balances,
        min_amounts: &dyn MinAmounts,
        reference: Decimal,
        now: DateTime<Utc>,
    ) -> EngineOutput {
        let mut cancelled_ids: Vec<OrderId> = Vec::new();

        // Step 1: cancel excessive orders.
        let mut remaining: Vec<&Order> = Vec::new();
        for order in effective_book {
            if band_set.excessive(order, reference) {
                cancelled_ids.push(order.id.clone());
            } else {
                remaining.push(order);
            }
        }

        // Step 2: cancel overfilled-band excess.
        for side in [Side::Buy, Side::Sell] {
            for (band_index, band) in band_set.bands(side).iter().enumerate() {
                let mut in_band: Vec<&&Order> = remaining
                    .iter()
                    .filter(|o| o.side == side && band_set.assign_band(o, reference) == Some(band_index))
                    .collect();

                let mut total: Decimal = in_band.iter().map(|o| o.band_amount()).sum();
                if total <= band.max_amount {
                    continue;
                }

                let target_price = band.target_price(side, reference);
                // Farthest from the band's avg-margin price first.
                in_band.sort_by(|a, b| {
                    let da = (a.price - target_price).abs();
                    let db = (b.price - target_price).abs();
                    db.cmp(&da)
                });

                let mut to_drop: Vec<OrderId> = Vec::new();
                for order in in_band {
                    if total <= band.avg_amount {
                        break;
                    }
                    total -= order.band_amount();
                    to_drop.push(order.id.clone());
                }

                remaining.retain(|o| !to_drop.contains(&o.id));
                cancelled_ids.extend(to_drop);
            }
        }

        // Step 3: place shortfalls.
        let mut places = Vec::new();
        let mut rate_limited = 0usize;
        for side in [Side::Buy, Side::Sell] {
            for (band_index, band) in band_set.bands(side).iter().enumerate() {
                let in_band: Vec<&Order> = remaining
                    .iter()
                    .filter(|o| o.side == side && band_set.assign_band(o, reference) == Some(band_index))
                    .map(|o| &**o)
                    .collect();
                let total: Decimal = in_band.iter().map(|o| o.band_amount()).sum();

                let Some(band_amount) = band.shortfall_amount(total, balances.available(side)) else {
                    continue;
                };

                let limit_allowance = limits.available(side, now);
                let amount = band_amount.min(limit_allowance);
                if amount < band_amount {
                    rate_limited += 1;
                }
                let exchange_min = min_amounts.min_amount(side);

                if amount <= Decimal::ZERO || amount < band.dust_cutoff || amount < exchange_min {
                    // Insufficient balance/limit headroom this cycle; retry next cycle.
                    continue;
                }

                let price = band.target_price(side, reference);
                limits.record(side, amount, now);
                places.push(PlaceOrder { side, price, amount });
            }
        }

        EngineOutput { cancels: cancelled_ids, places, rate_limited }
    }
}

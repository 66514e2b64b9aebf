//! Typed representation of the buy/sell bands document, its validation, and
//! the per-band computations the [`crate::engine::BandEngine`] composes.

use crate::error::ConfigError;
use crate::types::{Order, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One margin/amount policy for one side of the market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    #[serde(rename = "minMargin")]
    pub min_margin: Decimal,
    #[serde(rename = "avgMargin")]
    pub avg_margin: Decimal,
    #[serde(rename = "maxMargin")]
    pub max_margin: Decimal,
    #[serde(rename = "minAmount")]
    pub min_amount: Decimal,
    #[serde(rename = "avgAmount")]
    pub avg_amount: Decimal,
    #[serde(rename = "maxAmount")]
    pub max_amount: Decimal,
    #[serde(rename = "dustCutoff", default)]
    pub dust_cutoff: Decimal,
}

impl Band {
    fn validate_self(&self, side: Side, index: usize) -> Result<(), String> {
        let mut problems = Vec::new();
        if !(self.min_margin <= self.avg_margin && self.avg_margin <= self.max_margin) {
            problems.push(format!(
                "{side:?} band #{index}: margins not monotone ({} <= {} <= {} required)",
                self.min_margin, self.avg_margin, self.max_margin
            ));
        }
        if self.min_margin < Decimal::ZERO {
            problems.push(format!("{side:?} band #{index}: minMargin must be non-negative"));
        }
        if !(self.min_amount <= self.avg_amount && self.avg_amount <= self.max_amount) {
            problems.push(format!(
                "{side:?} band #{index}: amounts not monotone ({} <= {} <= {} required)",
                self.min_amount, self.avg_amount, self.max_amount
            ));
        }
        if self.min_amount < Decimal::ZERO {
            problems.push(format!("{side:?} band #{index}: minAmount must be non-negative"));
        }
        if self.dust_cutoff < Decimal::ZERO {
            problems.push(format!("{side:?} band #{index}: dustCutoff must be non-negative"));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// True iff `margin` (a non-negative side-relative deviation, see
    /// [`Order::margin`]) falls inside `(minMargin, maxMargin]` — the
    /// right-closed, left-open convention requires for stable
    /// boundary assignment — with the band whose `minMargin == 0` also
    /// accepting exactly `0`.
    fn contains_margin(&self, margin: Decimal) -> bool {
        let lower_ok = if self.min_margin.is_zero() {
            margin >= self.min_margin
        } else {
            margin > self.min_margin
        };
        lower_ok && margin <= self.max_margin
    }

    /// `p * (1 - avgMargin)` for a buy band, `p * (1 + avgMargin)` for a sell
    /// band.
    pub fn target_price(&self, side: Side, reference: Decimal) -> Decimal {
        match side {
            Side::Buy => reference * (Decimal::ONE - self.avg_margin),
            Side::Sell => reference * (Decimal::ONE + self.avg_margin),
        }
    }

    /// Amount to place to bring `total_amount` up toward `avgAmount`,
    /// clamped by `available_balance` and rejected if the resulting amount
    /// is below `dustCutoff`. Does *not* apply rate-limit or
    /// exchange-minimum clamping, since it needs inputs this module
    /// doesn't have.
    pub fn shortfall_amount(&self, total_amount: Decimal, available_balance: Decimal) -> Option<Decimal> {
        if total_amount >= self.min_amount {
            return None;
        }
        let gap = self.avg_amount - total_amount;
        let amount = gap.min(available_balance.max(Decimal::ZERO));
        if amount <= Decimal::ZERO || amount < self.dust_cutoff {
            return None;
        }
        Some(amount)
    }
}

/// A period/cap rate-limit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    #[serde(rename = "period", with = "period_serde")]
    pub period: Duration,
    #[serde(rename = "amount")]
    pub cap: Decimal,
}

/// Parses `"<N><s|m|h|d|w>"` into a [`Duration`].
pub fn parse_period(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::BadPeriod(raw.to_string()));
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::BadPeriod(raw.to_string()))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        "w" => n * 604_800,
        _ => return Err(ConfigError::BadPeriod(raw.to_string())),
    };
    Ok(Duration::from_secs(secs))
}

mod period_serde {
    use super::parse_period;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_period(&raw).map_err(serde::de::Error::custom)
    }
}

/// The validated buy/sell bands document plus optional per-side rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandSet {
    #[serde(rename = "buyBands")]
    pub buy_bands: Vec<Band>,
    #[serde(rename = "sellBands")]
    pub sell_bands: Vec<Band>,
    #[serde(rename = "buyLimits", default)]
    pub buy_limits: Vec<LimitRule>,
    #[serde(rename = "sellLimits", default)]
    pub sell_limits: Vec<LimitRule>,
}

impl BandSet {
    pub fn bands(&self, side: Side) -> &[Band] {
        match side {
            Side::Buy => &self.buy_bands,
            Side::Sell => &self.sell_bands,
        }
    }

    pub fn limits(&self, side: Side) -> &[LimitRule] {
        match side {
            Side::Buy => &self.buy_limits,
            Side::Sell => &self.sell_limits,
        }
    }

    /// Validates every band in the document, collecting *all* violations
    /// (not just the first) so the single log line emitted on rejection is
    /// informative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for (side, bands) in [(Side::Buy, &self.buy_bands), (Side::Sell, &self.sell_bands)] {
            for (i, band) in bands.iter().enumerate() {
                if let Err(e) = band.validate_self(side, i) {
                    problems.push(e);
                }
            }
            if let Some(overlap) = find_overlap(bands) {
                problems.push(format!("{side:?} bands #{} and #{} overlap", overlap.0, overlap.1));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidBands(problems.join("; ")))
        }
    }

    /// True iff `order`'s margin from `reference` lies outside every band of
    /// its side.
    pub fn excessive(&self, order: &Order, reference: Decimal) -> bool {
        self.assign_band(order, reference).is_none()
    }

    /// The unique band whose margin interval contains `order`'s margin from
    /// `reference`, or `None`.
    pub fn assign_band(&self, order: &Order, reference: Decimal) -> Option<usize> {
        let margin = order.margin(reference);
        self.bands(order.side)
            .iter()
            .position(|b| b.contains_margin(margin))
    }

    /// Sum of the side-denominated amount of `orders` assigned to band index
    /// `band_index` of `side`.
    pub fn total_amount(&self, side: Side, band_index: usize, orders: &[&Order], reference: Decimal) -> Decimal {
        orders
            .iter()
            .filter(|o| o.side == side && self.assign_band(o, reference) == Some(band_index))
            .map(|o| o.band_amount())
            .sum()
    }
}

/// Pairwise-overlap check over one side's band intervals.
fn find_overlap(bands: &[Band]) -> Option<(usize, usize)> {
    for i in 0..bands.len() {
        for j in (i + 1)..bands.len() {
            let (a, b) = (&bands[i], &bands[j]);
            let overlap = a.min_margin < b.max_margin && b.min_margin < a.max_margin;
            if overlap {
                return Some((i, j));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn band(min: &str, avg: &str, max: &str, min_amt: &str, avg_amt: &str, max_amt: &str) -> Band {
        Band {
            min_margin: min.parse().unwrap(),
            avg_margin: avg.parse().unwrap(),
            max_margin: max.parse().unwrap(),
            min_amount: min_amt.parse().unwrap(),
            avg_amount: avg_amt.parse().unwrap(),
            max_amount: max_amt.parse().unwrap(),
            dust_cutoff: Decimal::ZERO,
        }
    }

    fn order(side: Side, price: &str) -> Order {
        Order::new(
            "o1".into(),
            side,
            price.parse().unwrap(),
            Decimal::ONE,
            Decimal::ONE,
            Utc::now(),
        )
    }

    #[test]
    fn validate_rejects_overlapping_margins() {
        let bs = BandSet {
            buy_bands: vec![
                band("0.00", "0.01", "0.02", "1", "1", "1"),
                band("0.015", "0.02", "0.03", "1", "1", "1"),
            ],
            sell_bands: vec![],
            buy_limits: vec![],
            sell_limits: vec![],
        };
        assert!(bs.validate().is_err());
    }

    #[test]
    fn validate_accepts_adjacent_non_overlapping_margins() {
        let bs = BandSet {
            buy_bands: vec![
                band("0.00", "0.01", "0.02", "1", "1", "1"),
                band("0.02", "0.025", "0.03", "1", "1", "1"),
            ],
            sell_bands: vec![],
            buy_limits: vec![],
            sell_limits: vec![],
        };
        assert!(bs.validate().is_ok());
    }

    #[test]
    fn single_buy_band_shortfall_yields_avg_amount() {
        let b = band("0.005", "0.01", "0.02", "20", "30", "40");
        let reference: Decimal = "100".parse().unwrap();
        let price = b.target_price(Side::Buy, reference);
        assert_eq!(price, "99.00".parse::<Decimal>().unwrap());

        let amount = b.shortfall_amount(Decimal::ZERO, "1000".parse().unwrap());
        assert_eq!(amount, Some("30".parse().unwrap()));
    }

    #[test]
    fn reference_move_makes_resting_sell_order_excessive() {
        let bs = BandSet {
            buy_bands: vec![],
            sell_bands: vec![band("0.00", "0.015", "0.03", "20", "30", "40")],
            buy_limits: vec![],
            sell_limits: vec![],
        };
        let sell = order(Side::Sell, "103");
        assert!(!bs.excessive(&sell, "100".parse().unwrap()));
        assert!(bs.excessive(&sell, "99".parse().unwrap()));
    }

    #[test]
    fn assign_band_boundary_is_right_closed() {
        let bs = BandSet {
            buy_bands: vec![
                band("0.00", "0.01", "0.02", "1", "1", "1"),
                band("0.02", "0.025", "0.03", "1", "1", "1"),
            ],
            sell_bands: vec![],
            buy_limits: vec![],
            sell_limits: vec![],
        };
        // margin exactly 0.02 -> belongs to the *first* band under
        // right-closed/left-open (0, 0.02], not the second.
        let o = order(Side::Buy, "98");
        assert_eq!(bs.assign_band(&o, "100".parse().unwrap()), Some(0));
    }

    #[test]
    fn parse_period_units() {
        assert_eq!(parse_period("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_period("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_period("2d").unwrap(), Duration::from_secs(172_800));
        assert!(parse_period("1x").is_err());
    }
}

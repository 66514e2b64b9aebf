//! Sliding-window rate limiter over historical order placements: a per-side
//! window of placed amounts, windowed by wall-clock duration rather than a
//! fixed request budget.

use crate::bands::LimitRule;
use crate::types::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// One append-only placement record.
#[derive(Debug, Clone, Copy)]
struct Placement {
    at: DateTime<Utc>,
    side: Side,
    amount: Decimal,
}

/// Append-only placement history plus the active limit rules it is checked
/// against.
pub struct Limits {
    buy_rules: Vec<LimitRule>,
    sell_rules: Vec<LimitRule>,
    history: VecDeque<Placement>,
}

impl Limits {
    pub fn new(buy_rules: Vec<LimitRule>, sell_rules: Vec<LimitRule>) -> Self {
        Self {
            buy_rules,
            sell_rules,
            history: VecDeque::new(),
        }
    }

    fn rules(&self, side: Side) -> &[LimitRule] {
        match side {
            Side::Buy => &self.buy_rules,
            Side::Sell => &self.sell_rules,
        }
    }

    /// Maximum additional amount of `side` allowed to be placed right now,
    /// taking the minimum allowance across all active rules of that side. An
    /// empty rule list means unlimited.
    pub fn available(&self, side: Side, now: DateTime<Utc>) -> Decimal {
        let rules = self.rules(side);
        if rules.is_empty() {
            return Decimal::MAX;
        }
        rules
            .iter()
            .map(|rule| {
                let window_start = now - chrono::Duration::from_std(rule.period).unwrap_or_default();
                let used: Decimal = self
                    .history
                    .iter()
                    .filter(|p| p.side == side && p.at >= window_start)
                    .map(|p| p.amount)
                    .sum();
                (rule.cap - used).max(Decimal::ZERO)
            })
            .fold(Decimal::MAX, |acc, allowance| acc.min(allowance))
    }

    /// Appends a placement record. Entries older than the largest configured
    /// window are pruned.
    pub fn record(&mut self, side: Side, amount: Decimal, now: DateTime<Utc>) {
        self.history.push_back(Placement { at: now, side, amount });
        self.prune(now);
    }

    fn max_retention(&self) -> Option<std::time::Duration> {
        self.buy_rules
            .iter()
            .chain(self.sell_rules.iter())
            .map(|r| r.period)
            .max()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let Some(retention) = self.max_retention() else {
            self.history.clear();
            return;
        };
        let cutoff = now - chrono::Duration::from_std(retention).unwrap_or_default();
        while matches!(self.history.front(), Some(p) if p.at < cutoff) {
            self.history.pop_front();
        }
    }
}

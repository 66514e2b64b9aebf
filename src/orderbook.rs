//! Authoritative snapshot of the keeper's own open orders, augmented with a
//! short-lived in-flight set.

use crate::types::{Order, OrderId, Side};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Default number of cycles an in-flight entry survives without
/// confirmation before it is dropped regardless of outcome.
pub const DEFAULT_MAX_INFLIGHT_CYCLES: u64 = 5;

/// A raw fetch of the keeper's resting orders from the exchange.
#[derive(Debug, Clone, Default)]
pub struct OrderBookSnapshot {
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Copy)]
struct InFlightEntry {
    first_seen_cycle: u64,
}

/// A place whose exchange call timed out: it may have gone through, but no
/// order id came back to track it by. Reconciled by matching side/price/
/// amount against the next snapshot instead of by id.
#[derive(Debug, Clone)]
struct PendingPlace {
    side: Side,
    price: Decimal,
    amount: Decimal,
    first_seen_cycle: u64,
    synthetic_id: OrderId,
}

/// Tracks orders that were placed or cancelled recently enough that the
/// exchange's own snapshot may not yet reflect them.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    placed: HashMap<OrderId, (Order, InFlightEntry)>,
    cancelled: HashMap<OrderId, InFlightEntry>,
    pending: Vec<PendingPlace>,
    max_cycles: u64,
    pending_seq: u64,
}

impl InFlightTracker {
    pub fn new(max_cycles: u64) -> Self {
        Self {
            placed: HashMap::new(),
            cancelled: HashMap::new(),
            pending: Vec::new(),
            max_cycles,
            pending_seq: 0,
        }
    }

    /// Records that a placement for `order` was just issued this cycle. The
    /// order is assumed present until a fetched snapshot confirms it.
    pub fn note_placed(&mut self, order: Order, cycle: u64) {
        self.placed.insert(order.id.clone(), (order, InFlightEntry { first_seen_cycle: cycle }));
    }

    /// Records that a placement's exchange call timed out: no order id is
    /// known, so the tentative order is tracked by content and reconciled
    /// against the next snapshot.
    pub fn note_placed_pending(&mut self, side: Side, price: Decimal, amount: Decimal, cycle: u64) {
        self.pending_seq += 1;
        self.pending.push(PendingPlace {
            side,
            price,
            amount,
            first_seen_cycle: cycle,
            synthetic_id: format!("pending-{}", self.pending_seq),
        });
    }

    /// Records that a cancel for `id` was just issued this cycle.
    pub fn note_cancelled(&mut self, id: OrderId, cycle: u64) {
        self.cancelled.insert(id, InFlightEntry { first_seen_cycle: cycle });
    }

    /// Reconciles in-flight state against a freshly fetched snapshot:
    /// placements that now appear are confirmed and dropped; cancels whose
    /// id no longer appears are confirmed and dropped. Entries age out after
    /// `max_cycles` regardless of confirmation. Pending (id-less) placements
    /// are confirmed once a matching side/price/amount order appears.
    pub fn reconcile(&mut self, snapshot: &OrderBookSnapshot, cycle: u64) {
        let present: HashSet<&OrderId> = snapshot.orders.iter().map(|o| &o.id).collect();

        self.placed.retain(|id, (_, entry)| {
            let confirmed = present.contains(id);
            let expired = cycle.saturating_sub(entry.first_seen_cycle) > self.max_cycles;
            !confirmed && !expired
        });

        self.cancelled.retain(|id, entry| {
            let confirmed = !present.contains(id);
            let expired = cycle.saturating_sub(entry.first_seen_cycle) > self.max_cycles;
            !confirmed && !expired
        });

        self.pending.retain(|p| {
            let confirmed = snapshot
                .orders
                .iter()
                .any(|o| o.side == p.side && o.price == p.price && o.band_amount() == p.amount);
            let expired = cycle.saturating_sub(p.first_seen_cycle) > self.max_cycles;
            !confirmed && !expired
        });
    }

    /// The effective book: `(snapshot ∪ in_flight_placed ∪ pending_placed) \
    /// in_flight_cancelled`.
    pub fn effective_book(&self, snapshot: &OrderBookSnapshot) -> Vec<Order> {
        snapshot
            .orders
            .iter()
            .filter(|o| !self.cancelled.contains_key(&o.id))
            .cloned()
            .chain(self.placed.values().map(|(o, _)| o.clone()))
            .chain(self.pending.iter().map(|p| {
                Order::new(p.synthetic_id.clone(), p.side, p.price, p.amount, p.amount, Utc::now())
            }))
            .collect()
    }

    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str) -> Order {
        Order::new(id.into(), Side::Buy, Decimal::ONE, Decimal::ONE, Decimal::ONE, Utc::now())
    }

    #[test]
    fn placed_order_stays_effective_until_snapshot_confirms() {
        let mut tracker = InFlightTracker::new(5);
        tracker.note_placed(order("new1"), 1);
        let empty = OrderBookSnapshot::default();
        assert_eq!(tracker.effective_book(&empty).len(), 1);

        let confirmed = OrderBookSnapshot { orders: vec![order("new1")] };
        tracker.reconcile(&confirmed, 2);
        assert_eq!(tracker.placed_count(), 0);
    }

    #[test]
    fn cancelled_order_excluded_until_snapshot_drops_it() {
        let mut tracker = InFlightTracker::new(5);
        tracker.note_cancelled("old1".into(), 1);
        let still_there = OrderBookSnapshot { orders: vec![order("old1")] };
        assert_eq!(tracker.effective_book(&still_there).len(), 0);

        tracker.reconcile(&still_there, 2);
        assert_eq!(tracker.cancelled_count(), 1);

        let gone = OrderBookSnapshot::default();
        tracker.reconcile(&gone, 3);
        assert_eq!(tracker.cancelled_count(), 0);
    }

    #[test]
    fn inflight_entry_ages_out_after_bound() {
        let mut tracker = InFlightTracker::new(5);
        tracker.note_placed(order("stuck"), 1);
        let empty = OrderBookSnapshot::default();
        for cycle in 2..=6 {
            tracker.reconcile(&empty, cycle);
        }
        assert_eq!(tracker.placed_count(), 0, "in-flight entry must age out within a bounded number of cycles");
    }

    #[test]
    fn timed_out_place_is_tracked_pending_and_confirmed_by_content() {
        let mut tracker = InFlightTracker::new(5);
        tracker.note_placed_pending(Side::Buy, "99.00".parse().unwrap(), "30".parse().unwrap(), 1);
        let empty = OrderBookSnapshot::default();
        assert_eq!(tracker.effective_book(&empty).len(), 1, "a timed-out place must still appear in the effective book");
        assert_eq!(tracker.pending_count(), 1);

        let confirming = Order::new(
            "exchange-assigned-42".into(),
            Side::Buy,
            "99.00".parse().unwrap(),
            "30".parse().unwrap(),
            "30".parse().unwrap(),
            Utc::now(),
        );
        let confirmed = OrderBookSnapshot { orders: vec![confirming] };
        tracker.reconcile(&confirmed, 2);
        assert_eq!(tracker.pending_count(), 0, "a matching snapshot order confirms the pending place even without a shared id");
    }

    #[test]
    fn pending_place_ages_out_after_bound() {
        let mut tracker = InFlightTracker::new(5);
        tracker.note_placed_pending(Side::Sell, "101".parse().unwrap(), "10".parse().unwrap(), 1);
        let empty = OrderBookSnapshot::default();
        for cycle in 2..=6 {
            tracker.reconcile(&empty, cycle);
        }
        assert_eq!(tracker.pending_count(), 0, "a pending entry must age out within a bounded number of cycles");
    }
}

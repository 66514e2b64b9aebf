//! Periodic evaluator, cancellation scheduler, and shutdown handling: a
//! long-lived background task driven by `tokio::select!` with a shared
//! `tokio::sync::watch` channel for cooperative shutdown.

use crate::bands::BandSet;
use crate::clock::Clock;
use crate::config::ReloadableConfig;
use crate::engine::{BandEngine, Balances};
use crate::error::{ExchangeError, KeeperError};
use crate::exchange::ExchangeAdapter;
use crate::feed::Feed;
use crate::limits::Limits;
use crate::orderbook::{InFlightTracker, OrderBookSnapshot, DEFAULT_MAX_INFLIGHT_CYCLES};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

/// Keeper lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Why the control loop stopped, mapped to the process exit code in
/// `main.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    CleanDrain,
    StartupFailure(String),
    UnrecoverableDispatch,
    FeedPermanentlyUnavailable,
}

impl StopReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::CleanDrain => 0,
            StopReason::StartupFailure(_) => 1,
            StopReason::UnrecoverableDispatch => 2,
            StopReason::FeedPermanentlyUnavailable => 3,
        }
    }
}

/// Tuning knobs for one keeper instance.
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    pub refresh_interval: Duration,
    pub dispatch_concurrency: usize,
    pub balance_floor: Balances,
    /// Consecutive fully-failed cycles before giving up.
    pub max_consecutive_failed_cycles: u32,
    /// If true, permanent feed-tree unavailability for
    /// `max_consecutive_idle_cycles` causes a non-zero exit instead of
    /// quietly idling forever.
    pub fail_closed: bool,
    pub max_consecutive_idle_cycles: u32,
    /// Per-call timeout applied to every exchange-adapter call. A timed-out
    /// `get_orders`/`balances` call is treated as exchange-transient and
    /// retried next cycle; a timed-out cancel/place is assumed to have
    /// possibly succeeded and is reconciled from the next snapshot.
    pub call_timeout: Duration,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            dispatch_concurrency: 8,
            balance_floor: Balances::default(),
            max_consecutive_failed_cycles: 10,
            fail_closed: false,
            max_consecutive_idle_cycles: 1000,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Awaits `fut` with a deadline; a timeout is reported as a transient
/// exchange error so callers can apply the usual retry-next-cycle policy.
async fn with_call_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ExchangeError>>,
) -> Result<T, ExchangeError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Transient("exchange call timed out".to_string())),
    }
}

/// Logs an idle reason exactly once per transition into idleness, and once
/// more on resume.
#[derive(Default)]
struct IdleLogger {
    current: Option<String>,
}

impl IdleLogger {
    fn idle(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.current.as_deref() != Some(reason.as_str()) {
            warn!(reason = %reason, "keeper idle");
            self.current = Some(reason);
        }
    }

    fn resumed(&mut self) {
        if self.current.take().is_some() {
            info!("keeper resumed after idle condition cleared");
        }
    }
}

/// Drives the full starting/running/draining/stopped lifecycle for one
/// keeper instance against one exchange adapter, one price feed, and one
/// reloadable configuration.
pub struct ControlLoop {
    exchange: Arc<dyn ExchangeAdapter>,
    feed: Arc<dyn Feed>,
    config: Arc<ReloadableConfig>,
    clock: Arc<dyn Clock>,
    limits: Limits,
    in_flight: InFlightTracker,
    settings: ControlLoopConfig,
    state: KeeperState,
    cycle: u64,
    idle: IdleLogger,
    status: Option<watch::Sender<KeeperState>>,
    book: Option<watch::Sender<Vec<crate::types::Order>>>,
}

impl ControlLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        feed: Arc<dyn Feed>,
        config: Arc<ReloadableConfig>,
        clock: Arc<dyn Clock>,
        settings: ControlLoopConfig,
    ) -> Self {
        let snapshot = config.snapshot();
        let limits = Limits::new(snapshot.buy_limits.clone(), snapshot.sell_limits.clone());
        Self {
            exchange,
            feed,
            config,
            clock,
            limits,
            in_flight: InFlightTracker::new(DEFAULT_MAX_INFLIGHT_CYCLES),
            settings,
            state: KeeperState::Starting,
            cycle: 0,
            idle: IdleLogger::default(),
            status: None,
            book: None,
        }
    }

    /// Publishes lifecycle transitions onto `sender`, for a reporting
    /// endpoint's health handler to observe.
    pub fn with_status_channel(mut self, sender: watch::Sender<KeeperState>) -> Self {
        let _ = sender.send(self.state);
        self.status = Some(sender);
        self
    }

    /// Publishes the effective book after each cycle onto `sender`, for
    /// `reporting::report_task` to POST onward.
    pub fn with_book_channel(mut self, sender: watch::Sender<Vec<crate::types::Order>>) -> Self {
        self.book = Some(sender);
        self
    }

    pub fn state(&self) -> KeeperState {
        self.state
    }

    fn set_state(&mut self, state: KeeperState) {
        self.state = state;
        if let Some(sender) = &self.status {
            let _ = sender.send(state);
        }
    }

    /// Runs until a shutdown signal fires on `shutdown` or the keeper stops
    /// itself (startup failure, breached safety floor, unrecoverable
    /// dispatch loop, permanently unavailable feed under fail-closed).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> StopReason {
        if let Err(reason) = self.start().await {
            self.set_state(KeeperState::Stopped);
            return reason;
        }
        self.set_state(KeeperState::Running);

        let mut ticker = tokio::time::interval(self.settings.refresh_interval);
        let mut consecutive_failed_cycles = 0u32;
        let mut consecutive_idle_cycles = 0u32;

        let stop_reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(CycleOutcome::Active) => {
                            consecutive_failed_cycles = 0;
                            consecutive_idle_cycles = 0;
                        }
                        Ok(CycleOutcome::Idle) => {
                            consecutive_failed_cycles = 0;
                            consecutive_idle_cycles += 1;
                            if self.settings.fail_closed && consecutive_idle_cycles >= self.settings.max_consecutive_idle_cycles {
                                break StopReason::FeedPermanentlyUnavailable;
                            }
                        }
                        Err(KeeperError::SafetyFloorBreached(reason)) => {
                            warn!(reason = %reason, "safety floor breached, draining");
                            break StopReason::CleanDrain;
                        }
                        Err(KeeperError::Exchange(e)) if e.is_permanent() => {
                            error!(error = %e, "permanent exchange failure");
                            break StopReason::UnrecoverableDispatch;
                        }
                        Err(e) => {
                            warn!(error = %e, "cycle failed, retrying next cycle");
                            consecutive_failed_cycles += 1;
                            if consecutive_failed_cycles >= self.settings.max_consecutive_failed_cycles {
                                break StopReason::UnrecoverableDispatch;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        info!("shutdown signal received, draining");
                        break StopReason::CleanDrain;
                    }
                }
            }
        };

        self.drain().await;
        self.set_state(KeeperState::Stopped);
        stop_reason
    }

    async fn start(&mut self) -> Result<(), StopReason> {
        with_call_timeout(self.settings.call_timeout, self.exchange.get_orders())
            .await
            .map_err(|e| StopReason::StartupFailure(format!("could not reach exchange: {e}")))?;

        let price = self.feed.read().await;
        if price.is_none() {
            return Err(StopReason::StartupFailure("no initial price feed reading".to_string()));
        }

        let balances = with_call_timeout(self.settings.call_timeout, self.exchange.balances())
            .await
            .map_err(|e| StopReason::StartupFailure(format!("could not read balances: {e}")))?;
        if balances.buy < self.settings.balance_floor.buy || balances.sell < self.settings.balance_floor.sell {
            return Err(StopReason::StartupFailure("unsafe to start: balance below configured floor".to_string()));
        }
        Ok(())
    }

    async fn drain(&mut self) {
        self.set_state(KeeperState::Draining);
        if self.exchange.cancel_all_on_shutdown() {
            if let Ok(snapshot) = with_call_timeout(self.settings.call_timeout, self.exchange.get_orders()).await {
                for order in snapshot.orders {
                    if let Err(e) = with_call_timeout(self.settings.call_timeout, self.exchange.cancel_order(&order.id)).await {
                        warn!(id = %order.id, error = %e, "failed to cancel during drain");
                    }
                }
            }
        }
        if self.exchange.withdraw_on_shutdown() {
            info!("withdraw-on-shutdown requested; delegating to the exchange adapter's own process");
        }
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, KeeperError> {
        self.cycle += 1;
        let now = self.clock.now();

        let band_set: Arc<BandSet> = self.config.snapshot();

        let snapshot: OrderBookSnapshot =
            with_call_timeout(self.settings.call_timeout, self.exchange.get_orders())
                .await
                .map_err(KeeperError::Exchange)?;
        self.in_flight.reconcile(&snapshot, self.cycle);

        let balances = with_call_timeout(self.settings.call_timeout, self.exchange.balances())
            .await
            .map_err(KeeperError::Exchange)?;
        if balances.buy < self.settings.balance_floor.buy || balances.sell < self.settings.balance_floor.sell {
            return Err(KeeperError::SafetyFloorBreached("balance dropped below configured floor".to_string()));
        }

        let Some(reading) = self.feed.read().await else {
            self.idle.idle("price feed unavailable");
            crate::reporting::record_idle_cycle();
            return Ok(CycleOutcome::Idle);
        };
        self.idle.resumed();

        let effective_book = self.in_flight.effective_book(&snapshot);
        if let Some(sender) = &self.book {
            let _ = sender.send(effective_book.clone());
        }
        let output = BandEngine::evaluate(
            &band_set,
            &effective_book,
            &mut self.limits,
            balances,
            self.exchange.as_ref(),
            reading.price,
            now,
        );

        if output.is_empty() {
            crate::reporting::record_cycle(0, 0);
            return Ok(CycleOutcome::Active);
        }

        // Cancel-before-place within the cycle.
        let semaphore = Arc::new(Semaphore::new(self.settings.dispatch_concurrency));
        let cancel_ids = output.cancels.clone();
        dispatch_cancels(&self.exchange, &semaphore, &cancel_ids, self.settings.call_timeout).await;
        for id in &cancel_ids {
            // A cancel that timed out may still have gone through at the
            // exchange, so it is tracked as in-flight the same as a
            // confirmed dispatch; reconciliation sorts out the outcome.
            self.in_flight.note_cancelled(id.clone(), self.cycle);
        }

        let placed = dispatch_places(&self.exchange, &semaphore, &output.places, self.settings.call_timeout).await;
        let mut placed_count = 0;
        for (place, outcome) in placed {
            match outcome {
                PlaceOutcome::Confirmed(id) => {
                    self.in_flight.note_placed(
                        crate::types::Order::new(id, place.side, place.price, place.amount, place.amount, now),
                        self.cycle,
                    );
                    placed_count += 1;
                }
                PlaceOutcome::TimedOut => {
                    self.in_flight.note_placed_pending(place.side, place.price, place.amount, self.cycle);
                    placed_count += 1;
                }
                PlaceOutcome::Failed => {}
            }
        }

        if output.rate_limited > 0 {
            crate::reporting::record_rate_limited(output.rate_limited as u64);
        }
        crate::reporting::record_cycle(cancel_ids.len(), placed_count);
        Ok(CycleOutcome::Active)
    }
}

enum CycleOutcome {
    Active,
    Idle,
}

/// Outcome of one dispatched `place_order` call.
enum PlaceOutcome {
    /// The exchange returned an id within the timeout.
    Confirmed(crate::types::OrderId),
    /// The call timed out; it may have succeeded, so the order is tracked
    /// pending and reconciled from the next snapshot.
    TimedOut,
    /// The call returned an error (not a timeout); nothing to track.
    Failed,
}

async fn dispatch_cancels(
    exchange: &Arc<dyn ExchangeAdapter>,
    semaphore: &Arc<Semaphore>,
    ids: &[crate::types::OrderId],
    call_timeout: Duration,
) {
    let mut handles = Vec::new();
    for id in ids {
        let exchange = Arc::clone(exchange);
        let semaphore = Arc::clone(semaphore);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            match tokio::time::timeout(call_timeout, exchange.cancel_order(&id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(id = %id, error = %e, "cancel dispatch failed, will retry next cycle"),
                Err(_) => warn!(id = %id, "cancel dispatch timed out, assuming it may have succeeded"),
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn dispatch_places(
    exchange: &Arc<dyn ExchangeAdapter>,
    semaphore: &Arc<Semaphore>,
    places: &[crate::engine::PlaceOrder],
    call_timeout: Duration,
) -> Vec<(crate::engine::PlaceOrder, PlaceOutcome)> {
    let mut handles = Vec::new();
    for place in places.iter().cloned() {
        let exchange = Arc::clone(exchange);
        let semaphore = Arc::clone(semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            let outcome = match tokio::time::timeout(call_timeout, exchange.place_order(place.side, place.price, place.amount)).await {
                Ok(Ok(id)) => PlaceOutcome::Confirmed(id),
                Ok(Err(e)) => {
                    warn!(side = ?place.side, error = %e, "place dispatch failed, will retry next cycle");
                    PlaceOutcome::Failed
                }
                Err(_) => {
                    warn!(side = ?place.side, "place dispatch timed out, tracking as tentatively placed");
                    PlaceOutcome::TimedOut
                }
            };
            (place, outcome)
        }));
    }
    let mut placed = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((place, outcome)) => placed.push((place, outcome)),
            Err(e) => warn!(error = %e, "place dispatch task panicked"),
        }
    }
    placed
}

/// A `watch`-channel-backed shutdown handle the CLI wires up to
/// `tokio::signal::ctrl_c`.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{PassthroughTemplate, ReloadableConfig};
    use crate::exchange::PairConvention;
    use crate::feed::{Feed, FixedFeed};
    use crate::types::{Order, OrderId, Side};
    use async_trait::async_trait;
    use parking_lot::Mutex as PLMutex;
    use rust_decimal::Decimal;
    use std::io::Write;

    #[test]
    fn idle_logger_logs_exactly_once_per_transition() {
        let mut logger = IdleLogger::default();
        assert!(logger.current.is_none());

        logger.idle("no price reading");
        assert_eq!(logger.current.as_deref(), Some("no price reading"));
        // Same reason again must not be treated as a new transition.
        logger.idle("no price reading");
        assert_eq!(logger.current.as_deref(), Some("no price reading"));

        // A different reason is a new transition.
        logger.idle("balance below floor");
        assert_eq!(logger.current.as_deref(), Some("balance below floor"));

        logger.resumed();
        assert!(logger.current.is_none());
        // Resuming when already clear is a no-op, not a second log.
        logger.resumed();
        assert!(logger.current.is_none());
    }

    /// Fake adapter that records call order instead of talking to a venue.
    struct OrderRecordingExchange {
        calls: Arc<PLMutex<Vec<&'static str>>>,
        orders: PLMutex<Vec<Order>>,
    }

    #[async_trait]
    impl ExchangeAdapter for OrderRecordingExchange {
        async fn get_orders(&self) -> Result<OrderBookSnapshot, ExchangeError> {
            Ok(OrderBookSnapshot { orders: self.orders.lock().clone() })
        }

        async fn place_order(&self, side: Side, price: Decimal, amount: Decimal) -> Result<OrderId, ExchangeError> {
            self.calls.lock().push("place");
            Ok(format!("rec-{side:?}-{price}-{amount}"))
        }

        async fn cancel_order(&self, id: &OrderId) -> Result<(), ExchangeError> {
            self.calls.lock().push("cancel");
            self.orders.lock().retain(|o| &o.id != id);
            Ok(())
        }

        async fn balances(&self) -> Result<Balances, ExchangeError> {
            Ok(Balances { buy: "100000".parse().unwrap(), sell: "100000".parse().unwrap() })
        }

        fn min_amounts(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        fn pair_convention(&self) -> PairConvention {
            PairConvention { base: "WETH", quote: "DAI" }
        }
    }

    const BANDS: &[u8] = br#"{
        "buyBands": [{"minMargin":0.005,"avgMargin":0.01,"maxMargin":0.02,"minAmount":20,"avgAmount":30,"maxAmount":40,"dustCutoff":0}],
        "sellBands": []
    }"#;

    #[tokio::test]
    async fn cycle_dispatches_every_cancel_before_any_place() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BANDS).unwrap();
        let config = Arc::new(ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap());
        let feed: Arc<dyn Feed> = Arc::new(FixedFeed::new("100".parse().unwrap()));

        let calls = Arc::new(PLMutex::new(Vec::new()));
        // Resting order far outside the band's max margin: it is cancelled in
        // step 1, leaving the band empty, so the engine also emits a place.
        let stale = Order::new(
            "stale".into(),
            Side::Buy,
            "50".parse().unwrap(),
            "10".parse().unwrap(),
            "10".parse().unwrap(),
            chrono::Utc::now(),
        );
        let exchange: Arc<dyn ExchangeAdapter> =
            Arc::new(OrderRecordingExchange { calls: Arc::clone(&calls), orders: PLMutex::new(vec![stale]) });

        let mut control_loop =
            ControlLoop::new(exchange, feed, config, Arc::new(SystemClock), ControlLoopConfig::default());

        control_loop.run_cycle().await.unwrap();

        let recorded = calls.lock().clone();
        let first_place = recorded.iter().position(|c| *c == "place");
        let last_cancel = recorded.iter().rposition(|c| *c == "cancel");
        match (last_cancel, first_place) {
            (Some(cancel_idx), Some(place_idx)) => {
                assert!(cancel_idx < place_idx, "every cancel dispatch must complete before any place dispatch begins");
            }
            _ => panic!("expected both a cancel and a place to be dispatched this cycle, got {recorded:?}"),
        }
    }
}

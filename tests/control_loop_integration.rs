//! End-to-end: reloadable config + price feed + paper exchange driven by
//! one control loop, exercised together rather than as isolated units.

use keeper_core::clock::SystemClock;
use keeper_core::config::{PassthroughTemplate, ReloadableConfig};
use keeper_core::control::{shutdown_channel, ControlLoop, ControlLoopConfig};
use keeper_core::engine::Balances;
use keeper_core::exchange::{ExchangeAdapter, PaperExchange, PairConvention};
use keeper_core::feed::FixedFeed;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const BANDS: &str = r#"{
    "buyBands": [{"minMargin":0.005,"avgMargin":0.01,"maxMargin":0.02,"minAmount":20,"avgAmount":30,"maxAmount":40,"dustCutoff":0}],
    "sellBands": []
}"#;

#[tokio::test]
async fn fresh_start_places_a_shortfall_order_then_drains_on_shutdown() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BANDS.as_bytes()).unwrap();

    let config = Arc::new(ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap());
    let feed = Arc::new(FixedFeed::new("100".parse().unwrap()));
    let exchange: Arc<dyn ExchangeAdapter> = PaperExchange::shared(
        Balances { buy: "100000".parse().unwrap(), sell: "100000".parse().unwrap() },
        (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO),
        PairConvention { base: "WETH", quote: "DAI" },
    );

    let mut control_loop = ControlLoop::new(
        Arc::clone(&exchange),
        feed,
        config,
        Arc::new(SystemClock),
        ControlLoopConfig { refresh_interval: Duration::from_millis(20), ..ControlLoopConfig::default() },
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn(async move { control_loop.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let orders_before_shutdown = exchange.get_orders().await.unwrap().orders;
    assert_eq!(orders_before_shutdown.len(), 1, "engine should have filled the empty buy band once");

    shutdown_tx.send(true).unwrap();
    let stop_reason = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(stop_reason.exit_code(), 0);

    let orders_after_drain = exchange.get_orders().await.unwrap().orders;
    assert!(orders_after_drain.is_empty(), "paper exchange cancels all resting orders on drain");
}

#[tokio::test]
async fn startup_fails_closed_when_balances_are_below_the_configured_floor() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BANDS.as_bytes()).unwrap();

    let config = Arc::new(ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap());
    let feed = Arc::new(FixedFeed::new("100".parse().unwrap()));
    let exchange: Arc<dyn ExchangeAdapter> = PaperExchange::shared(
        Balances::default(),
        (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO),
        PairConvention { base: "WETH", quote: "DAI" },
    );

    let mut control_loop = ControlLoop::new(
        exchange,
        feed,
        config,
        Arc::new(SystemClock),
        ControlLoopConfig {
            refresh_interval: Duration::from_millis(20),
            balance_floor: Balances { buy: "1".parse().unwrap(), sell: "1".parse().unwrap() },
            ..ControlLoopConfig::default()
        },
    );

    let (_shutdown_tx, shutdown_rx) = shutdown_channel();
    let stop_reason = control_loop.run(shutdown_rx).await;
    assert_eq!(stop_reason.exit_code(), 1, "zero balance below a nonzero floor must refuse to start");
}

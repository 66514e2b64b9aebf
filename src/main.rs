//! Keeper CLI: wires a reloadable bands configuration, a composed price
//! feed, and an exchange adapter into the control loop, plus an optional
//! reporting endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use keeper_core::clock::SystemClock;
use keeper_core::config::{EnvTemplate, PassthroughTemplate, ReloadableConfig, TemplateEngine};
use keeper_core::control::{shutdown_channel, ControlLoop, ControlLoopConfig, KeeperState};
use keeper_core::engine::Balances;
use keeper_core::exchange::{ExchangeAdapter, PaperExchange, PairConvention};
use keeper_core::feed::{parse_uri_list, FeedRegistry};
use keeper_core::reporting;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keeper")]
#[command(about = "Keeps a venue's resting order book within configured price bands")]
struct Args {
    /// Path to the bands configuration document (JSON, optionally templated).
    #[arg(long, env = "KEEPER_CONFIG")]
    config: PathBuf,

    /// Render `{{VAR}}` directives in the config document from the process
    /// environment before parsing.
    #[arg(long, env = "KEEPER_CONFIG_TEMPLATE", default_value_t = false)]
    config_template: bool,

    /// How often to re-check the configuration file for changes.
    #[arg(long, env = "KEEPER_CONFIG_POLL_SECS", default_value_t = 10)]
    config_poll_secs: u64,

    /// Comma-separated price feed URI list, e.g. `fixed:2100.50` or
    /// `ws://host/stream,fixed:2000`.
    #[arg(long, env = "KEEPER_PRICE_FEED")]
    price_feed: String,

    /// Maximum age of a price reading before it is treated as unavailable.
    #[arg(long, env = "KEEPER_PRICE_FEED_MAX_AGE_SECS", default_value_t = 30)]
    price_feed_max_age_secs: u64,

    /// Seconds between control loop cycles.
    #[arg(long, env = "KEEPER_REFRESH_SECS", default_value_t = 5)]
    refresh_secs: u64,

    /// Minimum buy-side balance below which the keeper refuses to start or
    /// continue running.
    #[arg(long, env = "KEEPER_MIN_BUY_BALANCE", default_value = "0")]
    min_buy_balance: rust_decimal::Decimal,

    /// Minimum sell-side balance below which the keeper refuses to start or
    /// continue running.
    #[arg(long, env = "KEEPER_MIN_SELL_BALANCE", default_value = "0")]
    min_sell_balance: rust_decimal::Decimal,

    /// Bind address for the `/healthz` and `/metrics` reporting endpoint.
    /// Omit to disable reporting entirely.
    #[arg(long, env = "KEEPER_REPORTING_ADDR")]
    reporting_addr: Option<SocketAddr>,

    /// URL to POST the effective book to on an interval. Omit to disable
    /// outbound order-history reporting entirely.
    #[arg(long, env = "KEEPER_REPORT_URL")]
    report_url: Option<String>,

    /// Seconds between outbound effective-book reports.
    #[arg(long, env = "KEEPER_REPORT_INTERVAL_SECS", default_value_t = 30)]
    report_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "KEEPER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    tracing::info!("starting keeper");

    let template: Box<dyn TemplateEngine> = if args.config_template {
        Box::new(EnvTemplate)
    } else {
        Box::new(PassthroughTemplate)
    };
    let reloadable = Arc::new(
        ReloadableConfig::load(&args.config, template)
            .with_context(|| format!("loading bands configuration from {}", args.config.display()))?,
    );
    reloadable.spawn_watcher(Duration::from_secs(args.config_poll_secs));

    let registry = FeedRegistry::new();
    let feed = parse_uri_list(&args.price_feed, Duration::from_secs(args.price_feed_max_age_secs), &registry)
        .context("parsing --price-feed")?;

    // No live venue adapter ships in this crate; operators wire their own
    // `ExchangeAdapter` impl here. The paper exchange keeps the binary
    // runnable end to end for dry runs and demos.
    let exchange: Arc<dyn ExchangeAdapter> = PaperExchange::shared(
        Balances { buy: "1000000".parse().unwrap(), sell: "1000000".parse().unwrap() },
        (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO),
        PairConvention { base: "BASE", quote: "QUOTE" },
    );

    let settings = ControlLoopConfig {
        refresh_interval: Duration::from_secs(args.refresh_secs),
        balance_floor: Balances { buy: args.min_buy_balance, sell: args.min_sell_balance },
        ..ControlLoopConfig::default()
    };

    let (status_tx, status_rx) = tokio::sync::watch::channel(KeeperState::Starting);
    let (book_tx, book_rx) = tokio::sync::watch::channel(Vec::new());
    let mut control_loop = ControlLoop::new(exchange, feed, reloadable, Arc::new(SystemClock), settings)
        .with_status_channel(status_tx)
        .with_book_channel(book_tx);

    let reporting_task = args.reporting_addr.map(|addr| {
        let metrics_handle = reporting::install_metrics_recorder();
        let router = reporting::router(status_rx, metrics_handle);
        tokio::spawn(reporting::serve(addr, router))
    });

    let report_task = args.report_url.map(|url| {
        tokio::spawn(reporting::report_task(url, Duration::from_secs(args.report_interval_secs), book_rx))
    });

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let stop_reason = control_loop.run(shutdown_rx).await;
    tracing::info!(?stop_reason, "keeper stopped");

    if let Some(task) = reporting_task {
        task.abort();
    }
    if let Some(task) = report_task {
        task.abort();
    }

    std::process::exit(stop_reason.exit_code());
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

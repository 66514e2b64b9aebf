//! The price-feed tree: leaf sources, expiry wrapper, ordered
//! failover combinator, inverse wrapper. Persistent-connection leaves keep
//! a last-value-wins shared slot warm in a background task rather than
//! blocking a query on a round trip.

mod expiring;
mod failover;
mod file;
mod fixed;
mod inverse;
mod onchain;
mod shell;
mod uri;
mod ws;

pub use expiring::ExpiringFeed;
pub use failover::FailoverFeed;
pub use file::FileFeed;
pub use fixed::FixedFeed;
pub use inverse::InverseFeed;
pub use onchain::{OnChainFeed, OracleAdapter};
pub use shell::ShellFeed;
pub use uri::{parse_uri_list, FeedRegistry};
pub use ws::WsFeed;

use crate::types::PriceReading;
use async_trait::async_trait;

/// A single source of price readings, or "unavailable".
#[async_trait]
pub trait Feed: Send + Sync {
    async fn read(&self) -> Option<PriceReading>;
}

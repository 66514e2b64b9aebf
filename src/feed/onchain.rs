use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::Utc;

/// The exchange-adapter's node access, through which an on-chain
/// oracle price is read. A real implementation talks to a blockchain RPC
/// client; that client is an external collaborator, so this crate only
/// defines the seam, without embedding any JSON-RPC plumbing.
#[async_trait]
pub trait OracleAdapter: Send + Sync {
    async fn read_price(&self, pair: &str) -> Option<rust_decimal::Decimal>;
}

/// Reads a price from a contract via an injected [`OracleAdapter`].
pub struct OnChainFeed<A: OracleAdapter> {
    adapter: A,
    pair: String,
}

impl<A: OracleAdapter> OnChainFeed<A> {
    pub fn new(adapter: A, pair: impl Into<String>) -> Self {
        Self { adapter, pair: pair.into() }
    }
}

#[async_trait]
impl<A: OracleAdapter> Feed for OnChainFeed<A> {
    async fn read(&self) -> Option<PriceReading> {
        let price = self.adapter.read_price(&self.pair).await?;
        Some(PriceReading::new(price, Utc::now()))
    }
}

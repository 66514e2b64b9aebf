use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

/// Always returns the configured price, never stale.
pub struct FixedFeed {
    price: Decimal,
}

impl FixedFeed {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

#[async_trait]
impl Feed for FixedFeed {
    async fn read(&self) -> Option<PriceReading> {
        Some(PriceReading::new(self.price, Utc::now()))
    }
}

use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Returns `1 / price`; propagates unavailability`).
pub struct InverseFeed {
    inner: Arc<dyn Feed>,
}

impl InverseFeed {
    pub fn new(inner: Arc<dyn Feed>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Feed for InverseFeed {
    async fn read(&self) -> Option<PriceReading> {
        let reading = self.inner.read().await?;
        if reading.price.is_zero() {
            return None;
        }
        Some(PriceReading::new(Decimal::ONE / reading.price, reading.acquired_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Always(Decimal);

    #[async_trait]
    impl Feed for Always {
        async fn read(&self) -> Option<PriceReading> {
            Some(PriceReading::new(self.0, Utc::now()))
        }
    }

    #[tokio::test]
    async fn double_inverse_round_trips() {
        let base = Arc::new(Always("123.456".parse().unwrap()));
        let once = InverseFeed::new(base.clone());
        let twice = InverseFeed::new(Arc::new(once));

        let original = base.read().await.unwrap().price;
        let round_tripped = twice.read().await.unwrap().price;

        let diff = (original - round_tripped).abs();
        assert!(diff < "0.0000001".parse().unwrap(), "round-trip diff too large: {diff}");
    }
}

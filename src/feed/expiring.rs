use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Wraps any feed; reports *unavailable* when the inner reading is older
/// than `max_age``).
pub struct ExpiringFeed {
    inner: Arc<dyn Feed>,
    max_age: ChronoDuration,
}

impl ExpiringFeed {
    pub fn new(inner: Arc<dyn Feed>, max_age: Duration) -> Self {
        Self {
            inner,
            max_age: ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::zero()),
        }
    }
}

#[async_trait]
impl Feed for ExpiringFeed {
    async fn read(&self) -> Option<PriceReading> {
        let reading = self.inner.read().await?;
        if reading.is_fresher_than(self.max_age, Utc::now()) {
            Some(reading)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaleFeed(PriceReading);

    #[async_trait]
    impl Feed for StaleFeed {
        async fn read(&self) -> Option<PriceReading> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn stale_inner_reading_reports_unavailable() {
        let old = PriceReading::new("100".parse().unwrap(), Utc::now() - ChronoDuration::seconds(120));
        let feed = ExpiringFeed::new(Arc::new(StaleFeed(old)), Duration::from_secs(30));
        assert!(feed.read().await.is_none());
    }

    #[tokio::test]
    async fn fresh_inner_reading_passes_through() {
        let fresh = PriceReading::new("100".parse().unwrap(), Utc::now());
        let feed = ExpiringFeed::new(Arc::new(StaleFeed(fresh)), Duration::from_secs(30));
        assert!(feed.read().await.is_some());
    }
}

use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use std::sync::Arc;

/// On query, returns the first available reading in listed priority order.
/// Every wrapped feed keeps producing independently (ws feeds run their own
/// connection tasks, setzer-style feeds poll on their own cadence) — this
/// combinator just reads each leaf's already-warm state in order`).
pub struct FailoverFeed {
    feeds: Vec<Arc<dyn Feed>>,
}

impl FailoverFeed {
    pub fn new(feeds: Vec<Arc<dyn Feed>>) -> Self {
        Self { feeds }
    }
}

#[async_trait]
impl Feed for FailoverFeed {
    async fn read(&self) -> Option<PriceReading> {
        for feed in &self.feeds {
            if let Some(reading) = feed.read().await {
                return Some(reading);
            }
        }
        None
    }
}

use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::warn;

/// Invokes a configured external command per query and caches the result
/// briefly, for price sources that only expose a CLI rather than an HTTP
/// or websocket endpoint.
pub struct ShellFeed {
    command: String,
    args: Vec<String>,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, PriceReading)>>,
}

impl ShellFeed {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_cache_ttl(command, args, Duration::from_secs(1))
    }

    pub fn with_cache_ttl(command: impl Into<String>, args: Vec<String>, cache_ttl: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    async fn invoke(&self) -> Option<PriceReading> {
        let output = Command::new(&self.command).args(&self.args).output().await;
        let output = match output {
            Ok(o) => o,
            Err(e) => {
                warn!(command = %self.command, error = %e, "price feed command failed to spawn");
                return None;
            }
        };
        if !output.status.success() {
            warn!(command = %self.command, status = ?output.status, "price feed command exited non-zero");
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        match text.trim().parse::<rust_decimal::Decimal>() {
            Ok(price) => Some(PriceReading::new(price, Utc::now())),
            Err(e) => {
                warn!(command = %self.command, error = %e, output = %text, "price feed command produced unparseable output");
                None
            }
        }
    }
}

#[async_trait]
impl Feed for ShellFeed {
    async fn read(&self) -> Option<PriceReading> {
        {
            let cache = self.cache.lock();
            if let Some((at, reading)) = *cache {
                if at.elapsed() < self.cache_ttl {
                    return Some(reading);
                }
            }
        }
        let reading = self.invoke().await;
        if let Some(r) = reading {
            *self.cache.lock() = Some((Instant::now(), r));
        }
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_and_parses_stdout() {
        let feed = ShellFeed::new("echo", vec!["12.5".to_string()]);
        let reading = feed.read().await.unwrap();
        assert_eq!(reading.price, "12.5".parse().unwrap());
    }

    #[tokio::test]
    async fn caches_briefly() {
        let feed = ShellFeed::with_cache_ttl("echo", vec!["1".to_string()], Duration::from_secs(60));
        let first = feed.read().await.unwrap();
        let second = feed.read().await.unwrap();
        assert_eq!(first.acquired_at, second.acquired_at, "second read should hit the cache");
    }
}

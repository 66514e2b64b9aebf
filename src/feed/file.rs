use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct FileDocument {
    price: rust_decimal::Decimal,
}

/// Re-reads a small JSON document `{"price": <decimal>}` on each query.
/// Synchronous in the sense that there is no background producer task —
/// every `read()` is a fresh disk read.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Feed for FileFeed {
    async fn read(&self) -> Option<PriceReading> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "price feed file unreadable");
                return None;
            }
        };
        match serde_json::from_str::<FileDocument>(&raw) {
            Ok(doc) => Some(PriceReading::new(doc.price, Utc::now())),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "price feed file malformed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_price_from_disk_each_query() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"price": 42.5}}"#).unwrap();

        let feed = FileFeed::new(file.path());
        let reading = feed.read().await.unwrap();
        assert_eq!(reading.price, "42.5".parse().unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let feed = FileFeed::new("/nonexistent/path/for/test.json");
        assert!(feed.read().await.is_none());
    }
}

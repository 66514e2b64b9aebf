use super::Feed;
use crate::types::PriceReading;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct WsMessage {
    price: rust_decimal::Decimal,
}

/// Maintains a persistent bidirectional connection and stores the last
/// price message pushed by the server, with auto-reconnect on drop. A
/// background task owns the socket; `read()` just samples the shared slot.
pub struct WsFeed {
    slot: Arc<Mutex<Option<PriceReading>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl WsFeed {
    /// Spawns the background connection task immediately.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let slot = Arc::new(Mutex::new(None));
        let task_slot = Arc::clone(&slot);
        let task = tokio::spawn(run_producer(url, task_slot));
        Self { slot, _task: task }
    }
}

#[async_trait]
impl Feed for WsFeed {
    async fn read(&self) -> Option<PriceReading> {
        *self.slot.lock()
    }
}

async fn run_producer(url: String, slot: Arc<Mutex<Option<PriceReading>>>) {
    let mut backoff = Duration::from_millis(500);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    loop {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                info!(url = %url, "price feed websocket connected");
                backoff = Duration::from_millis(500);
                let (_write, mut read) = stream.split();
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                            Ok(parsed) => {
                                *slot.lock() = Some(PriceReading::new(parsed.price, Utc::now()));
                            }
                            Err(e) => debug!(url = %url, error = %e, "unparseable price feed message"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(url = %url, error = %e, "price feed websocket error");
                            break;
                        }
                    }
                }
                warn!(url = %url, "price feed websocket disconnected, reconnecting");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "price feed websocket connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

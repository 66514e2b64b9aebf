//! Price-feed URI parsing: turns a comma-separated list
//! into a failover of expiring wrappers sharing one default `maxAge`.

use super::{ExpiringFeed, Feed, FailoverFeed, FileFeed, FixedFeed, WsFeed};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Resolves named pair tags (e.g. `eth_dai`, `eth_dai-setzer`, `eth_dai-tub`)
/// to implementation-provided feeds. The core does not know how
/// to construct these itself — that's wiring the CLI/exchange-adapter layer
/// owns — so callers register concrete feeds under their tag before parsing.
#[derive(Default)]
pub struct FeedRegistry {
    named: HashMap<String, Arc<dyn Feed>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, feed: Arc<dyn Feed>) {
        self.named.insert(tag.into(), feed);
    }
}

/// Parses a comma-separated URI list into `Failover(Expiring(leaf, maxAge), ...)`.
pub fn parse_uri_list(spec: &str, default_max_age: Duration, registry: &FeedRegistry) -> Result<Arc<dyn Feed>, ConfigError> {
    let mut leaves = Vec::new();
    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let leaf = parse_one(token, registry)?;
        leaves.push(Arc::new(ExpiringFeed::new(leaf, default_max_age)) as Arc<dyn Feed>);
    }
    if leaves.is_empty() {
        return Err(ConfigError::Parse("empty price feed URI list".to_string()));
    }
    Ok(Arc::new(FailoverFeed::new(leaves)))
}

fn parse_one(token: &str, registry: &FeedRegistry) -> Result<Arc<dyn Feed>, ConfigError> {
    if let Some(rest) = token.strip_prefix("fixed:") {
        let price = rest
            .parse()
            .map_err(|_| ConfigError::Parse(format!("invalid fixed price {rest:?}")))?;
        return Ok(Arc::new(FixedFeed::new(price)));
    }
    if let Some(rest) = token.strip_prefix("file:") {
        return Ok(Arc::new(FileFeed::new(rest)));
    }
    if token.starts_with("ws://") || token.starts_with("wss://") {
        return Ok(Arc::new(WsFeed::connect(token)));
    }
    registry
        .named
        .get(token)
        .cloned()
        .ok_or_else(|| ConfigError::Parse(format!("unknown price feed tag {token:?}")))
}

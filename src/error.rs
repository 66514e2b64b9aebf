//! Crate-wide error kinds.
//!
//! Each variant corresponds to one row of the error-handling table: the
//! control loop matches on these to decide whether to idle, retry, or drain
//! and exit.

use thiserror::Error;

/// Top-level error type returned by the keeper's fallible public APIs.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// The bands/limits configuration document failed validation or parsing.
    /// The previous valid snapshot stays in effect; this is never fatal.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No fresh price reading is available from the feed tree.
    #[error("price feed unavailable: {0}")]
    FeedUnavailable(String),

    /// An exchange-adapter call failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// A configured balance floor was breached; the keeper must start
    /// draining immediately.
    #[error("safety floor breached: {0}")]
    SafetyFloorBreached(String),

    /// A shutdown signal was received; the control loop should drain
    /// cooperatively.
    #[error("shutdown requested")]
    Shutdown,
}

/// Configuration parsing/validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("template expansion failed: {0}")]
    Template(String),

    #[error("band validation failed: {0}")]
    InvalidBands(String),

    #[error("unrecognized limit period suffix in {0:?}, expected one of s/m/h/d/w")]
    BadPeriod(String),
}

/// Exchange-adapter failures: transient ones are retried next cycle,
/// permanent ones drain the keeper and exit non-zero.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient exchange failure: {0}")]
    Transient(String),

    #[error("permanent exchange failure: {0}")]
    Permanent(String),
}

impl ExchangeError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExchangeError::Permanent(_))
    }
}

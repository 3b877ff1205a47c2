//! Error types for the stats store.
//!
//! - [`StoreError`] - failures talking to the backing store
//! - [`CodecError`] - a metric value that cannot be encoded
//! - [`ConfigError`] - bad configuration, surfaced at startup
//! - [`StatsError`] - everything a collector operation can fail with
//!
//! Decoding never fails: a stored value that cannot be read back as an opaque
//! blob is returned as text instead.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result alias for backing store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for collector operations.
pub type StatsResult<T> = Result<T, StatsError>;

/// Errors raised by a [`StoreClient`](crate::store::StoreClient) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connect or socket timeout elapsed.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, reset or otherwise unusable.
    #[error("store connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The store rejected our credentials.
    #[error("store authentication failed: {0}")]
    Auth(String),

    /// The store answered with an error reply (WRONGTYPE, not an integer, ...).
    #[error("store replied with error: {0}")]
    Response(String),

    /// The reply could not be understood.
    #[error("store protocol error: {0}")]
    Protocol(String),

    /// A transactional batch was refused as a whole.
    #[error("store transaction aborted: {0}")]
    TransactionAborted(String),
}

impl StoreError {
    pub fn connection(message: impl Into<String>, source: io::Error) -> Self {
        StoreError::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Store-unavailable conditions: timeout, refused/reset connection, bad credentials.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Connection { .. } | StoreError::Auth(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Errors raised while encoding a metric value for storage.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot store non-finite float {0}")]
    NonFinite(f64),

    #[error("cannot serialize opaque value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration problems. Raised while building collectors, clients and
/// servers, never deferred to the first store call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid key template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid job name {name:?}: {reason}")]
    InvalidJob { name: String, reason: String },

    #[error("unsupported text encoding {0:?} (only utf-8 is supported)")]
    UnsupportedEncoding(String),

    #[error("invalid connection url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("missing required parameter {0}")]
    MissingParameter(&'static str),

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors returned by collector operations.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An extremal update found a non-numeric value in the slot.
    #[error("metric {metric:?} holds a non-numeric value")]
    NotNumeric { metric: String },

    /// The compare-and-set loop lost every race it entered.
    #[error("metric {metric:?} still contended after {attempts} attempts")]
    Contention { metric: String, attempts: u32 },
}

impl StatsError {
    /// True when the backing store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, StatsError::Store(e) if e.is_connectivity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StoreError::Timeout(Duration::from_secs(30)).is_connectivity());
        assert!(StoreError::Auth("WRONGPASS".into()).is_connectivity());
        assert!(StoreError::connection(
            "refused",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
        )
        .is_connectivity());
        assert!(!StoreError::Response("WRONGTYPE".into()).is_connectivity());
        assert!(!StoreError::Protocol("bad".into()).is_timeout());
    }

    #[test]
    fn test_stats_error_wraps_store_outage() {
        let err: StatsError = StoreError::Timeout(Duration::from_secs(1)).into();
        assert!(err.is_store_unavailable());

        let err = StatsError::NotNumeric {
            metric: "peak".into(),
        };
        assert!(!err.is_store_unavailable());
        assert!(err.to_string().contains("peak"));
    }
}

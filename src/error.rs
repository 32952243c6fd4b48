//! Error types for store access, rate limiting and stats aggregation.
use std::path::PathBuf;

use crate::store::ScriptHandle;

/// Failures reported by a [`Store`](crate::store::Store) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached, or the round trip timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A batch referenced a script digest the store has not compiled.
    ///
    /// Batches carrying an unknown digest are refused as a whole.
    #[error("script {0} is not loaded on the store")]
    NoScript(ScriptHandle),
    /// The store forgot a script while the batch was already running.
    ///
    /// Every command except the script invocations was applied. Only the
    /// invocations may be resent.
    #[error("script {0} vanished mid-batch; script invocations were not applied")]
    ScriptsNotApplied(ScriptHandle),
    /// The store compiled or ran a script and it failed.
    #[error("script error: {0}")]
    Script(String),
    /// The store answered with something the caller did not expect
    /// (wrong value type, unparseable number, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Check if the store reported a missing compiled script.
    pub fn is_no_script(&self) -> bool {
        matches!(self, Self::NoScript(_))
    }

    /// Check if this is a connectivity failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Top-level error returned by the limiter and the stats aggregator.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    /// The server-side script source could not be read at startup.
    #[error("could not read script source at {path:?}: {source}")]
    Configuration {
        /// Location the source was read from.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The sliding window for `name` is saturated. The triggering hit was still recorded.
    #[error("rate limit exceeded for '{name}' ({hits} hits in window, max {max_hits})")]
    LimitExceeded {
        /// Limiter name that was hit.
        name: String,
        /// Events in the window after this hit was recorded.
        hits: u64,
        /// Configured threshold.
        max_hits: u64,
    },
    /// A reading carried a NaN or infinite value and was not applied.
    #[error("reading for site {site_id} has non-finite {field} ({value})")]
    InvalidReading {
        /// Site the reading belongs to.
        site_id: u64,
        /// Offending field.
        field: &'static str,
        /// Value as provided.
        value: f64,
    },
    /// A store round trip failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TallyError {
    /// Check if this error is a saturated rate-limit window.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }

    /// Check if this error is a startup configuration failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if a reading was refused before reaching the store.
    pub fn is_invalid_reading(&self) -> bool {
        matches!(self, Self::InvalidReading { .. })
    }

    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors produced when validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_hits` must be > 0.
    #[error("max_hits must be > 0 (got {provided})")]
    InvalidMaxHits {
        /// Value provided by caller.
        provided: u64,
    },
    /// Windows are tracked in whole milliseconds and must fit in an `i64` score.
    #[error("window must fit in i64 milliseconds (got {provided_ms} ms)")]
    WindowTooLarge {
        /// Value provided by caller, in milliseconds.
        provided_ms: u128,
    },
    /// Key prefixes cannot be empty or contain whitespace/control characters.
    #[error("invalid key prefix {0:?}")]
    InvalidPrefix(String),
    /// Stats TTL must be at least one second.
    #[error("stats ttl must be at least one second")]
    InvalidTtl,
}

/// Error returned by [`RateLimitService`](crate::rate_limit::RateLimitService).
#[derive(Debug, thiserror::Error)]
pub enum LimitError<E> {
    /// The request's window is saturated.
    #[error("rate limited on '{name}' ({hits} hits, max {max_hits})")]
    Limited {
        /// Limiter name derived from the request.
        name: String,
        /// Events in the window after this hit was recorded.
        hits: u64,
        /// Configured threshold.
        max_hits: u64,
    },
    /// The limiter could not reach the store.
    #[error("rate limiter unavailable: {0}")]
    Store(#[source] StoreError),
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> LimitError<E> {
    /// Check if the request was rejected by the limiter.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

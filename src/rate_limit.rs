//! Rate limiting primitives.
//!
//! - [`RateLimiter`]: the core trait for admit/deny decisions.
//! - [`SlidingWindowLimiter`]: a sliding-window log kept in a [`Store`](crate::store::Store).
//! - [`RateLimitLayer`]: Tower middleware that enforces a limiter per request.
//! - [`Decision`]: the result of a check.
//!
//! # Architecture
//!
//! - **Middleware**: `RateLimitLayer` wraps your service. It doesn't know *how* limiting works,
//!   only that it should ask a `RateLimiter` about the name derived from each request.
//! - **Logic**: `SlidingWindowLimiter` builds one atomic batch per hit.
//! - **Storage**: all window state lives in the store, so every process sharing
//!   the store shares the limit.

use crate::error::StoreError;

pub mod middleware;
pub mod sliding_window;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use sliding_window::SlidingWindowLimiter;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Events in the window, including this one.
        hits: u64,
        /// Hits left before the window saturates.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
    },
    /// The request is denied. Its event was recorded anyway.
    Denied {
        /// Events in the window, including this one.
        hits: u64,
        /// Configured threshold.
        max_hits: u64,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Events counted in the window when the decision was made.
    pub fn hits(&self) -> u64 {
        match self {
            Decision::Allowed { hits, .. } | Decision::Denied { hits, .. } => *hits,
        }
    }
}

/// Core interface for rate limiting logic.
///
/// Decouples the middleware from the algorithm and from the storage backend.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record one event for `name` and decide whether it is admitted.
    async fn check(&self, name: &str) -> Result<Decision, StoreError>;
}

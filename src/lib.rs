#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tallystore
//!
//! Store-coordinated access patterns for async Rust: a sliding-window rate
//! limiter and per-site rolling statistics that stay correct when many
//! callers (threads, processes, machines) write at once.
//!
//! ## Features
//!
//! - **Sliding-window limiter**: record, evict and count in one atomic batch
//! - **Rolling stats**: count, last report time, max/min output and max spare
//!   capacity per site and day, with extremal fields updated server side
//! - **Pluggable store**: [`InMemoryStore`] for tests, `tallystore-redis` for Redis
//! - **Tower middleware** for limiting any service
//! - **Telemetry sinks** for limiter decisions and stats updates
//!
//! ## Quick Start
//!
//! ```rust
//! use tallystore::{InMemoryStore, SlidingWindowLimiter, WindowConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WindowConfig::new(Duration::from_secs(60), 2)?;
//!     let limiter = SlidingWindowLimiter::new(InMemoryStore::new(), config);
//!
//!     limiter.hit("client-a").await?;
//!     limiter.hit("client-a").await?;
//!     assert!(limiter.hit("client-a").await.unwrap_err().is_limit_exceeded());
//!     Ok(())
//! }
//! ```

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod prelude;
pub mod rate_limit;
pub mod script;
pub mod sites;
pub mod stats;
pub mod store;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StatsConfig, WindowConfig};
pub use error::{ConfigError, LimitError, StoreError, TallyError};
pub use keys::KeySchema;
pub use rate_limit::{Decision, RateLimitLayer, RateLimiter, SlidingWindowLimiter};
pub use script::{CompareAndUpdate, ScriptOperation};
pub use sites::{Coordinate, Site, SiteStore};
pub use stats::{MeterReading, SiteStats, StatsAggregator};
pub use store::{Batch, InMemoryStore, Reply, ScriptHandle, Store};

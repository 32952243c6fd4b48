//! Convenient re-exports for common tallystore types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    config::{StatsConfig, WindowConfig, WEEK_SECONDS},
    error::{ConfigError, LimitError, StoreError, TallyError},
    keys::KeySchema,
    rate_limit::{Decision, RateLimitLayer, RateLimitService, RateLimiter, SlidingWindowLimiter},
    script::{CompareAndUpdate, ScriptOperation},
    sites::{Site, SiteStore},
    stats::{MeterReading, SiteStats, StatsAggregator},
    store::{Batch, Command, InMemoryStore, Reply, ScriptHandle, Store},
    telemetry::{LogSink, MemorySink, NullSink, TallyEvent, TelemetrySink},
};

use crate::clock::{Clock, SystemClock};
use crate::config::WindowConfig;
use crate::error::{StoreError, TallyError};
use crate::keys::KeySchema;
use crate::rate_limit::{Decision, RateLimiter};
use crate::store::{Batch, Reply, Store};
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TallyEvent, TelemetrySink};
use async_trait::async_trait;
use std::sync::Arc;

/// A sliding-window-log rate limiter.
///
/// Each hit is recorded as a sorted-set member scored by its capture time in
/// milliseconds. Recording the hit, evicting events that fell out of the
/// window and counting what remains happen in one atomic batch, so concurrent
/// callers (in any process) can never all observe a stale count and jointly
/// overshoot `max_hits`.
///
/// The window covering a hit at `now` is `(now - window, now]`. For a
/// zero-width window the eviction bound is clamped to `now - 1`, so events
/// recorded in the current millisecond (including the caller's own) are kept.
pub struct SlidingWindowLimiter<S, T = NullSink> {
    store: Arc<S>,
    config: WindowConfig,
    schema: KeySchema,
    clock: Arc<dyn Clock>,
    sink: T,
}

impl<S, T> std::fmt::Debug for SlidingWindowLimiter<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("schema", &self.schema)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S> SlidingWindowLimiter<S>
where
    S: Store + 'static,
{
    /// Create a limiter backed by `store`.
    pub fn new(store: S, config: WindowConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    /// Create a limiter sharing an already wrapped store.
    pub fn from_arc(store: Arc<S>, config: WindowConfig) -> Self {
        Self {
            store,
            config,
            schema: KeySchema::default(),
            clock: Arc::new(SystemClock),
            sink: NullSink,
        }
    }
}

impl<S, T> SlidingWindowLimiter<S, T> {
    /// Key prefix for the window sets.
    pub fn with_schema(mut self, schema: KeySchema) -> Self {
        self.schema = schema;
        self
    }

    /// Clock used to score hits. Every process sharing a window must agree on it.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Send limiter events to `sink`.
    pub fn with_sink<U>(self, sink: U) -> SlidingWindowLimiter<S, U>
    where
        U: TelemetrySink,
    {
        SlidingWindowLimiter {
            store: self.store,
            config: self.config,
            schema: self.schema,
            clock: self.clock,
            sink,
        }
    }

    /// Window width and threshold.
    pub fn config(&self) -> WindowConfig {
        self.config
    }

    /// Store key holding the window for `name`.
    pub fn key_for(&self, name: &str) -> String {
        self.schema.limiter_key(self.config.window_ms(), name, self.config.max_hits())
    }

    /// Highest score evicted by a hit at `now`.
    fn eviction_bound(&self, now: i64) -> i64 {
        // WindowConfig guarantees window_ms fits in i64.
        let width = self.config.window_ms().max(1) as i64;
        now.saturating_sub(width)
    }
}

impl<S, T> SlidingWindowLimiter<S, T>
where
    S: Store + 'static,
    T: TelemetrySink,
    T::Future: Send,
{
    /// Record a hit for `name`.
    ///
    /// # Errors
    /// [`TallyError::LimitExceeded`] when the window already holds `max_hits`
    /// events (the hit is still recorded); [`TallyError::Store`] when the
    /// store cannot be reached.
    pub async fn hit(&self, name: &str) -> Result<(), TallyError> {
        match self.check(name).await? {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { hits, max_hits } => {
                Err(TallyError::LimitExceeded { name: name.to_string(), hits, max_hits })
            }
        }
    }
}

#[async_trait]
impl<S, T> RateLimiter for SlidingWindowLimiter<S, T>
where
    S: Store + 'static,
    T: TelemetrySink,
    T::Future: Send,
{
    async fn check(&self, name: &str) -> Result<Decision, StoreError> {
        let now = i64::try_from(self.clock.now_millis()).unwrap_or(i64::MAX);
        let key = self.key_for(name);
        // Same-millisecond hits must stay distinct members.
        let member = format!("{}:{}", now, rand::random::<f64>());

        let mut batch = Batch::new();
        batch.zadd(&key, now, member).zrem_range_by_score(&key, 0, self.eviction_bound(now)).zcard(&key);
        let replies = self.store.exec(batch).await?;

        let hits = replies
            .get(2)
            .and_then(Reply::as_int)
            .ok_or_else(|| StoreError::Protocol(format!("missing ZCARD reply for {}", key)))?;
        let hits = u64::try_from(hits).unwrap_or(0);
        let max_hits = self.config.max_hits();

        let (decision, event) = if hits > max_hits {
            tracing::debug!(target: "tallystore::limiter", limiter = %name, hits, max_hits, "hit rejected");
            (
                Decision::Denied { hits, max_hits },
                LimiterEvent::Rejected { name: name.to_string(), hits, max_hits },
            )
        } else {
            tracing::trace!(target: "tallystore::limiter", limiter = %name, hits, max_hits, "hit admitted");
            (
                Decision::Allowed { hits, remaining: max_hits - hits },
                LimiterEvent::Admitted { name: name.to_string(), hits, max_hits },
            )
        };
        emit_best_effort(self.sink.clone(), TallyEvent::Limiter(event)).await;
        Ok(decision)
    }
}

//! Per-site daily statistics kept consistent under concurrent writers.
//!
//! Every reading is folded into a hash keyed by site and UTC day. The count,
//! the report timestamp, the TTL refresh and the three extremal fields are
//! written by a single atomic batch; the extremal fields go through the
//! server-side [`CompareAndUpdate`] script, so two readings racing on the same
//! record can never overwrite each other's maximum or minimum.

use crate::clock::{Clock, SystemClock};
use crate::config::StatsConfig;
use crate::error::{StoreError, TallyError};
use crate::keys::KeySchema;
use crate::script::CompareAndUpdate;
use crate::store::{Batch, Reply, ScriptHandle, Store};
use crate::telemetry::{emit_best_effort, NullSink, StatsEvent, TallyEvent, TelemetrySink};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One meter measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterReading {
    pub site_id: u64,
    /// When the reading was taken; selects the daily record.
    pub date_time: DateTime<Utc>,
    /// Watt-hours generated.
    pub wh_generated: f64,
    /// Watt-hours used.
    pub wh_used: f64,
}

impl MeterReading {
    /// Spare capacity: generated minus used.
    pub fn current_capacity(&self) -> f64 {
        self.wh_generated - self.wh_used
    }
}

/// Daily rolling statistics for one site.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteStats {
    pub last_reporting_time: DateTime<Utc>,
    pub meter_reading_count: u64,
    pub max_wh_generated: f64,
    pub min_wh_generated: f64,
    pub max_capacity: f64,
}

impl SiteStats {
    pub const LAST_REPORTING_TIME: &'static str = "last_reporting_time";
    pub const METER_READING_COUNT: &'static str = "meter_reading_count";
    pub const MAX_WH_GENERATED: &'static str = "max_wh_generated";
    pub const MIN_WH_GENERATED: &'static str = "min_wh_generated";
    pub const MAX_CAPACITY: &'static str = "max_capacity";

    /// Parse a stored hash. `None` if any field is missing or malformed.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let get = |name: &str| fields.get(name).map(String::as_str);
        Some(Self {
            last_reporting_time: DateTime::parse_from_rfc3339(get(Self::LAST_REPORTING_TIME)?)
                .ok()?
                .with_timezone(&Utc),
            meter_reading_count: get(Self::METER_READING_COUNT)?.parse().ok()?,
            max_wh_generated: get(Self::MAX_WH_GENERATED)?.parse().ok()?,
            min_wh_generated: get(Self::MIN_WH_GENERATED)?.parse().ok()?,
            max_capacity: get(Self::MAX_CAPACITY)?.parse().ok()?,
        })
    }
}

/// Applies readings to daily [`SiteStats`] records.
pub struct StatsAggregator<S, T = NullSink> {
    store: Arc<S>,
    script: CompareAndUpdate,
    schema: KeySchema,
    config: StatsConfig,
    clock: Arc<dyn Clock>,
    sink: T,
}

impl<S, T> std::fmt::Debug for StatsAggregator<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("script", &self.script.handle())
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> StatsAggregator<S>
where
    S: Store + 'static,
{
    /// Compile the bundled script on `store` and build an aggregator.
    pub async fn new(store: S) -> Result<Self, TallyError> {
        let script = CompareAndUpdate::bundled(&store).await?;
        Ok(Self::with_script(store, script))
    }

    /// Read the script from `path`; fails with [`TallyError::Configuration`] if unreadable.
    pub async fn from_script_file(store: S, path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let script = CompareAndUpdate::load(&store, path).await?;
        Ok(Self::with_script(store, script))
    }

    pub fn with_script(store: S, script: CompareAndUpdate) -> Self {
        Self::from_arc(Arc::new(store), script)
    }

    pub fn from_arc(store: Arc<S>, script: CompareAndUpdate) -> Self {
        Self {
            store,
            script,
            schema: KeySchema::default(),
            config: StatsConfig::default(),
            clock: Arc::new(SystemClock),
            sink: NullSink,
        }
    }
}

impl<S, T> StatsAggregator<S, T> {
    /// Key prefix for the daily records.
    pub fn with_schema(mut self, schema: KeySchema) -> Self {
        self.schema = schema;
        self
    }

    /// TTL and other record settings.
    pub fn with_config(mut self, config: StatsConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for the report timestamp and for [`find_today`](Self::find_today).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sink<U>(self, sink: U) -> StatsAggregator<S, U>
    where
        U: TelemetrySink,
    {
        StatsAggregator {
            store: self.store,
            script: self.script,
            schema: self.schema,
            config: self.config,
            clock: self.clock,
            sink,
        }
    }

    pub fn script(&self) -> &CompareAndUpdate {
        &self.script
    }

    /// Store key of the record for `site_id` on `day`.
    pub fn key_for(&self, site_id: u64, day: NaiveDate) -> String {
        self.schema.site_stats_key(site_id, day)
    }

    fn update_batch(&self, key: &str, reading: &MeterReading) -> Batch {
        let reported_at = self.clock.now_utc().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut batch = Batch::new();
        batch
            .hset(key, SiteStats::LAST_REPORTING_TIME, reported_at)
            .hincr_by(key, SiteStats::METER_READING_COUNT, 1)
            .expire(key, self.config.ttl_seconds());
        self.queue_extremal_updates(&mut batch, key, reading);
        batch
    }

    /// The three compare-and-update invocations. Each is idempotent for a given reading.
    fn queue_extremal_updates(&self, batch: &mut Batch, key: &str, reading: &MeterReading) {
        self.script.update_if_greater(batch, key, SiteStats::MAX_WH_GENERATED, reading.wh_generated);
        self.script.update_if_less(batch, key, SiteStats::MIN_WH_GENERATED, reading.wh_generated);
        self.script.update_if_greater(
            batch,
            key,
            SiteStats::MAX_CAPACITY,
            reading.current_capacity(),
        );
    }
}

fn validate(reading: &MeterReading) -> Result<(), TallyError> {
    let fields = [
        ("wh_generated", reading.wh_generated),
        ("wh_used", reading.wh_used),
        ("current_capacity", reading.current_capacity()),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(TallyError::InvalidReading { site_id: reading.site_id, field, value });
        }
    }
    Ok(())
}

impl<S, T> StatsAggregator<S, T>
where
    S: Store + 'static,
    T: TelemetrySink,
    T::Future: Send,
{
    /// Fold `reading` into its daily record in one atomic batch.
    ///
    /// Readings with a NaN or infinite value are refused with
    /// [`TallyError::InvalidReading`] before anything is sent.
    ///
    /// If the store no longer knows the script handle, the script is
    /// recompiled and the batch is sent once more. The refused batch had no
    /// effect, so the retry cannot double count. If the script vanished while
    /// the batch was applying, the count and timestamp already landed and only
    /// the compare-and-update invocations are resent.
    pub async fn update(&self, reading: &MeterReading) -> Result<(), TallyError> {
        validate(reading)?;
        let day = reading.date_time.date_naive();
        let key = self.key_for(reading.site_id, day);

        let readings = match self.store.exec(self.update_batch(&key, reading)).await {
            Ok(replies) => reading_count(&replies),
            Err(StoreError::NoScript(stale)) => {
                self.reload_script(&key, &stale).await?;
                reading_count(&self.store.exec(self.update_batch(&key, reading)).await?)
            }
            Err(StoreError::ScriptsNotApplied(stale)) => {
                self.reload_script(&key, &stale).await?;
                let mut batch = Batch::new();
                self.queue_extremal_updates(&mut batch, &key, reading);
                self.store.exec(batch).await?;
                self.store
                    .hgetall(&key)
                    .await?
                    .get(SiteStats::METER_READING_COUNT)
                    .and_then(|count| count.parse().ok())
                    .unwrap_or_default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(target: "tallystore::stats", site_id = reading.site_id, %day, readings, "reading applied");
        emit_best_effort(
            self.sink.clone(),
            TallyEvent::Stats(StatsEvent::Updated { site_id: reading.site_id, day, readings }),
        )
        .await;
        Ok(())
    }

    async fn reload_script(&self, key: &str, stale: &ScriptHandle) -> Result<(), TallyError> {
        tracing::warn!(target: "tallystore::stats", key = %key, handle = %stale, "store lost compare-and-update script; reloading");
        let handle = self.script.reload(self.store.as_ref()).await?;
        emit_best_effort(self.sink.clone(), TallyEvent::Stats(StatsEvent::ScriptReloaded { handle }))
            .await;
        Ok(())
    }

    /// Stats for `site_id` on `day`; `None` if nothing was recorded (or it expired).
    pub async fn find_by_id(
        &self,
        site_id: u64,
        day: NaiveDate,
    ) -> Result<Option<SiteStats>, TallyError> {
        let fields = self.store.hgetall(&self.key_for(site_id, day)).await?;
        Ok(SiteStats::from_fields(&fields))
    }

    /// Stats for `site_id` on the clock's current UTC day.
    pub async fn find_today(&self, site_id: u64) -> Result<Option<SiteStats>, TallyError> {
        self.find_by_id(site_id, self.clock.now_utc().date_naive()).await
    }
}

fn reading_count(replies: &[Reply]) -> i64 {
    replies.get(1).and_then(Reply::as_int).unwrap_or_default()
}

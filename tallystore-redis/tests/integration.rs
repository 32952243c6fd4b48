use chrono::{TimeZone, Utc};
use std::time::Duration;
use tallystore::{
    Batch, KeySchema, ManualClock, MeterReading, SlidingWindowLimiter, StatsAggregator, Store,
    StoreError, WindowConfig,
};
use tallystore_redis::RedisStore;

// Requires Redis running. If TALLYSTORE_TEST_REDIS_URL is unset, the tests skip.
async fn connect() -> Option<RedisStore> {
    let url = match std::env::var("TALLYSTORE_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set TALLYSTORE_TEST_REDIS_URL (e.g. redis://127.0.0.1/)");
            return None;
        }
    };
    let client = redis::Client::open(url.as_str())
        .unwrap_or_else(|e| panic!("invalid redis url '{}': {}", url, e));
    Some(
        RedisStore::connect(client)
            .await
            .unwrap_or_else(|e| panic!("Failed to connect to redis at '{}': {}", url, e)),
    )
}

fn schema() -> KeySchema {
    KeySchema::new(format!("tallytest:{}", uuid::Uuid::new_v4())).expect("valid prefix")
}

#[tokio::test]
async fn limiter_admits_max_hits_per_window() {
    let Some(store) = connect().await else { return };
    let clock = ManualClock::new(1_000_000);
    let config = WindowConfig::new(Duration::from_secs(60), 2).unwrap();
    let limiter =
        SlidingWindowLimiter::new(store, config).with_schema(schema()).with_clock(clock.clone());

    limiter.hit("a").await.expect("first admitted");
    limiter.hit("a").await.expect("second admitted");
    assert!(limiter.hit("a").await.unwrap_err().is_limit_exceeded());

    clock.advance(Duration::from_secs(61));
    limiter.hit("a").await.expect("admitted after the window slides");
}

#[tokio::test]
async fn stats_survive_script_flush() {
    let Some(store) = connect().await else { return };
    let agg = StatsAggregator::new(store.clone()).await.unwrap().with_schema(schema());
    let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
    let reading = |g: f64| MeterReading { site_id: 7, date_time: at, wh_generated: g, wh_used: 1.0 };

    agg.update(&reading(5.0)).await.unwrap();
    let client = redis::Client::open(std::env::var("TALLYSTORE_TEST_REDIS_URL").unwrap()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("SCRIPT").arg("FLUSH").query_async(&mut conn).await.unwrap();
    agg.update(&reading(9.0)).await.unwrap();

    let stats = agg.find_by_id(7, at.date_naive()).await.unwrap().expect("record exists");
    assert_eq!(stats.meter_reading_count, 2);
    assert_eq!(stats.max_wh_generated, 9.0);
    assert_eq!(stats.min_wh_generated, 5.0);
    assert_eq!(stats.max_capacity, 8.0);
}

#[tokio::test]
async fn unknown_script_refuses_whole_batch() {
    let Some(store) = connect().await else { return };
    let key = schema().key("refused");
    let missing = tallystore::ScriptHandle::of("return 'never loaded'");

    let mut batch = Batch::new();
    batch.hincr_by(&key, "count", 1).evalsha(missing.clone(), vec![key.clone()], vec![]);
    assert_eq!(store.exec(batch).await.unwrap_err(), StoreError::NoScript(missing));
    assert!(store.hgetall(&key).await.unwrap().is_empty());
}

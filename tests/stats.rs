#![allow(missing_docs)]

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tallystore::telemetry::{MemorySink, StatsEvent, TallyEvent};
use tallystore::{
    Clock, InMemoryStore, ManualClock, MeterReading, StatsAggregator, StoreError, TallyError,
};

const DAY: (i32, u32, u32) = (2026, 10, 18);

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(DAY.0, DAY.1, DAY.2).unwrap()
}

fn reading(site_id: u64, generated: f64, used: f64) -> MeterReading {
    MeterReading {
        site_id,
        date_time: Utc.with_ymd_and_hms(DAY.0, DAY.1, DAY.2, 9, 30, 0).unwrap(),
        wh_generated: generated,
        wh_used: used,
    }
}

fn clock() -> ManualClock {
    ManualClock::at(Utc.with_ymd_and_hms(DAY.0, DAY.1, DAY.2, 10, 0, 0).unwrap())
}

async fn aggregator(store: &InMemoryStore, clock: &ManualClock) -> StatsAggregator<InMemoryStore> {
    StatsAggregator::new(store.clone()).await.expect("script loads").with_clock(clock.clone())
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;
    assert_eq!(agg.find_by_id(1, day()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_updates_keep_the_higher_max() {
    let store = InMemoryStore::new();
    let agg = Arc::new(aggregator(&store, &clock()).await);

    let a = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.update(&reading(1, 5.0, 1.0)).await })
    };
    let b = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.update(&reading(1, 9.0, 1.0)).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let stats = agg.find_by_id(1, day()).await.unwrap().expect("record exists");
    assert_eq!(stats.max_wh_generated, 9.0);
    assert_eq!(stats.min_wh_generated, 5.0);
    assert_eq!(stats.max_capacity, 8.0);
    assert_eq!(stats.meter_reading_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_writers_lose_nothing() {
    let store = InMemoryStore::new();
    let agg = Arc::new(aggregator(&store, &clock()).await);
    let values: Vec<f64> = (0..100).map(|i| ((i * 37) % 101) as f64 - 20.5).collect();

    let handles = values.iter().map(|&v| {
        let agg = agg.clone();
        tokio::spawn(async move { agg.update(&reading(3, v, 0.0)).await })
    });
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let stats = agg.find_by_id(3, day()).await.unwrap().unwrap();
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let min = values.iter().cloned().fold(f64::MAX, f64::min);
    assert_eq!(stats.meter_reading_count, 100);
    assert_eq!(stats.max_wh_generated, max);
    assert_eq!(stats.min_wh_generated, min);
    assert_eq!(stats.max_capacity, max);
}

#[tokio::test]
async fn count_matches_number_of_updates() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;
    for k in 1..=7u64 {
        agg.update(&reading(2, k as f64, 0.5)).await.unwrap();
        let stats = agg.find_by_id(2, day()).await.unwrap().unwrap();
        assert_eq!(stats.meter_reading_count, k);
    }
}

#[tokio::test]
async fn reads_are_idempotent() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;
    agg.update(&reading(1, 3.0, 1.0)).await.unwrap();

    let first = agg.find_by_id(1, day()).await.unwrap();
    let second = agg.find_by_id(1, day()).await.unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn report_time_and_today_follow_the_clock() {
    let store = InMemoryStore::new();
    let clock = clock();
    let agg = aggregator(&store, &clock).await;
    agg.update(&reading(4, 1.0, 0.0)).await.unwrap();

    let stats = agg.find_today(4).await.unwrap().unwrap();
    assert_eq!(stats.last_reporting_time, clock.now_utc());

    clock.advance(Duration::from_secs(24 * 3600));
    assert_eq!(agg.find_today(4).await.unwrap(), None);
}

#[tokio::test]
async fn readings_on_different_days_use_different_records() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;
    let mut tomorrow = reading(1, 50.0, 0.0);
    tomorrow.date_time = tomorrow.date_time + chrono::Duration::days(1);

    agg.update(&reading(1, 1.0, 0.0)).await.unwrap();
    agg.update(&tomorrow).await.unwrap();

    let today = agg.find_by_id(1, day()).await.unwrap().unwrap();
    assert_eq!(today.max_wh_generated, 1.0);
    assert_eq!(today.meter_reading_count, 1);
    let next = agg.find_by_id(1, tomorrow.date_time.date_naive()).await.unwrap().unwrap();
    assert_eq!(next.max_wh_generated, 50.0);
}

#[tokio::test]
async fn ttl_is_refreshed_by_each_update() {
    let clock = clock();
    let store = InMemoryStore::with_clock(clock.clone());
    let agg = aggregator(&store, &clock).await;
    let key = agg.key_for(1, day());

    agg.update(&reading(1, 1.0, 0.0)).await.unwrap();
    assert_eq!(store.ttl_millis(&key), Some(604_800_000));

    clock.advance(Duration::from_secs(6 * 24 * 3600));
    agg.update(&reading(1, 2.0, 0.0)).await.unwrap();
    assert_eq!(store.ttl_millis(&key), Some(604_800_000));

    clock.advance(Duration::from_secs(6 * 24 * 3600));
    assert!(agg.find_by_id(1, day()).await.unwrap().is_some());

    clock.advance(Duration::from_secs(2 * 24 * 3600));
    assert_eq!(agg.find_by_id(1, day()).await.unwrap(), None);
}

#[tokio::test]
async fn lost_script_is_reloaded_transparently() {
    let store = InMemoryStore::new();
    let sink = MemorySink::new();
    let agg = aggregator(&store, &clock()).await.with_sink(sink.clone());

    agg.update(&reading(1, 4.0, 0.0)).await.unwrap();
    store.flush_scripts();
    agg.update(&reading(1, 6.0, 0.0)).await.unwrap();

    let stats = agg.find_by_id(1, day()).await.unwrap().unwrap();
    assert_eq!(stats.meter_reading_count, 2);
    assert_eq!(stats.max_wh_generated, 6.0);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, TallyEvent::Stats(StatsEvent::ScriptReloaded { .. }))));
}

#[tokio::test]
async fn script_lost_mid_batch_counts_the_reading_once() {
    let store = InMemoryStore::new();
    let sink = MemorySink::new();
    let agg = aggregator(&store, &clock()).await.with_sink(sink.clone());

    agg.update(&reading(1, 4.0, 0.0)).await.unwrap();
    store.lose_scripts_during_next_batch();
    agg.update(&reading(1, 6.0, 1.0)).await.unwrap();

    let stats = agg.find_by_id(1, day()).await.unwrap().unwrap();
    assert_eq!(stats.meter_reading_count, 2);
    assert_eq!(stats.max_wh_generated, 6.0);
    assert_eq!(stats.min_wh_generated, 4.0);
    assert_eq!(stats.max_capacity, 5.0);
    let events = sink.events();
    assert!(events.iter().any(|e| matches!(e, TallyEvent::Stats(StatsEvent::ScriptReloaded { .. }))));
    assert!(events.contains(&TallyEvent::Stats(StatsEvent::Updated { site_id: 1, day: day(), readings: 2 })));
}

#[tokio::test]
async fn non_finite_readings_leave_the_record_untouched() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;

    let err = agg.update(&reading(1, f64::NAN, 0.0)).await.unwrap_err();
    match err {
        TallyError::InvalidReading { site_id, field, value } => {
            assert_eq!((site_id, field), (1, "wh_generated"));
            assert!(value.is_nan());
        }
        other => panic!("expected InvalidReading, got {:?}", other),
    }
    assert_eq!(agg.find_by_id(1, day()).await.unwrap(), None);

    agg.update(&reading(1, 9.0, 0.0)).await.unwrap();
    agg.update(&reading(1, 5.0, 0.0)).await.unwrap();
    assert!(agg.update(&reading(1, 7.0, f64::NEG_INFINITY)).await.unwrap_err().is_invalid_reading());

    let stats = agg.find_by_id(1, day()).await.unwrap().unwrap();
    assert_eq!(stats.meter_reading_count, 2);
    assert_eq!(stats.max_wh_generated, 9.0);
    assert_eq!(stats.min_wh_generated, 5.0);
    assert_eq!(stats.max_capacity, 9.0);
}

#[tokio::test]
async fn unreadable_script_is_a_configuration_error() {
    let err = StatsAggregator::from_script_file(InMemoryStore::new(), "/no/such/script.lua")
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::Configuration { .. }));
}

#[tokio::test]
async fn failed_update_leaves_record_untouched() {
    let store = InMemoryStore::new();
    let agg = aggregator(&store, &clock()).await;
    agg.update(&reading(1, 4.0, 0.0)).await.unwrap();
    let before = agg.find_by_id(1, day()).await.unwrap();

    store.fail_next(1);
    match agg.update(&reading(1, 100.0, 0.0)).await {
        Err(TallyError::Store(StoreError::Unavailable(_))) => {}
        other => panic!("expected store error, got {:?}", other),
    }
    assert_eq!(agg.find_by_id(1, day()).await.unwrap(), before);
}

proptest! {
    #[test]
    fn extremal_fields_bound_every_reading(
        readings in prop::collection::vec((-1.0e6f64..1.0e6, 0.0f64..1.0e3), 1..40)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let stats = rt.block_on(async {
            let store = InMemoryStore::new();
            let agg = aggregator(&store, &clock()).await;
            for &(generated, used) in &readings {
                agg.update(&reading(9, generated, used)).await.unwrap();
            }
            agg.find_by_id(9, day()).await.unwrap().unwrap()
        });

        prop_assert_eq!(stats.meter_reading_count, readings.len() as u64);
        for &(generated, used) in &readings {
            prop_assert!(stats.max_wh_generated >= generated);
            prop_assert!(stats.min_wh_generated <= generated);
            prop_assert!(stats.max_capacity >= generated - used);
        }
        prop_assert!(readings.iter().any(|&(g, _)| g == stats.max_wh_generated));
        prop_assert!(readings.iter().any(|&(g, _)| g == stats.min_wh_generated));
    }
}

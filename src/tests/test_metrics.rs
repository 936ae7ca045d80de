use std::env;

use redis::aio::ConnectionManager;

use super::runtime::block_on;
use crate::{
    CacheKey, KeySource, MetricReader, Throttler, ThrottlerOptions, metrics::format_metrics,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_key() -> CacheKey {
    let n: u64 = rand::random();
    CacheKey::try_from(format!("tideway_test_{n}")).unwrap()
}

async fn connect(url: &str) -> ConnectionManager {
    let client = redis::Client::open(url).unwrap();
    client.get_connection_manager().await.unwrap()
}

#[test]
fn format_metrics_parses_members_and_skips_malformed() {
    let raw = vec![
        ("3:9f8b1c".to_string(), 1000.5),
        ("not-a-record".to_string(), 1001.0),
        ("x:abc".to_string(), 1001.5),
        ("7:0d2e4a".to_string(), 1002.0),
    ];

    let metrics = format_metrics("tideway_metric:orders", raw);
    assert_eq!(metrics.len(), 2);

    assert_eq!(metrics[0].count, 3);
    assert_eq!(metrics[0].id, "9f8b1c");
    assert_eq!(metrics[0].key, "orders");
    assert_eq!(metrics[0].metric_key, "tideway_metric:orders");
    assert_eq!(metrics[0].timestamp, 1000.5);

    assert_eq!(metrics[1].count, 7);
    assert_eq!(metrics[1].timestamp, 1002.0);
}

#[test]
fn admissions_record_window_counts_when_enabled() {
    let Some(url) = redis_url() else { return };

    block_on(async {
        let client = connect(&url).await;
        let key = unique_key();
        let throttler = Throttler::new(ThrottlerOptions {
            client: client.clone(),
            rate: "10/s".parse().unwrap(),
            key: KeySource::from(key.clone()),
            key_prefix: None,
            enable_sleep_wait: None,
            max_retry_times: None,
            max_retry_duration: None,
            enable_pipeline: None,
            enable_metric_record: Some(true),
            eviction_slack: None,
        })
        .await
        .unwrap();

        throttler.wait("tag-1").await.unwrap();
        throttler.wait("tag-2").await.unwrap();
        throttler.wait("tag-3").await.unwrap();

        let reader = MetricReader::new(client.clone());
        let metrics = reader.load(&key).await.unwrap();

        // Counts include the caller's own speculative reservation.
        let counts: Vec<u64> = metrics.iter().map(|m| m.count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        for metric in &metrics {
            assert_eq!(metric.key, key.as_str());
        }

        let everything = reader.load_all().await.unwrap();
        let ours = everything
            .iter()
            .filter(|m| m.key == key.as_str())
            .count();
        assert_eq!(ours, 3);

        reader.reset(&key).await.unwrap();
        assert!(reader.load(&key).await.unwrap().is_empty());
        // Idempotent on a missing key.
        reader.reset(&key).await.unwrap();

        throttler.reset().await.unwrap();
    });
}

#[test]
fn metrics_are_not_recorded_by_default() {
    let Some(url) = redis_url() else { return };

    block_on(async {
        let client = connect(&url).await;
        let key = unique_key();
        let throttler = Throttler::new(ThrottlerOptions {
            client: client.clone(),
            rate: "10/s".parse().unwrap(),
            key: KeySource::from(key.clone()),
            key_prefix: None,
            enable_sleep_wait: None,
            max_retry_times: None,
            max_retry_duration: None,
            enable_pipeline: None,
            enable_metric_record: None,
            eviction_slack: None,
        })
        .await
        .unwrap();

        throttler.wait("tag-1").await.unwrap();

        let reader = MetricReader::new(client);
        assert!(reader.load(&key).await.unwrap().is_empty());

        throttler.reset().await.unwrap();
    });
}

use std::time::Duration;

use crate::{
    CacheKey, KeySource, ThrottlerDefaults, TidewayError,
    config::{format_cache_key, format_metric_key},
};

#[test]
fn cache_key_try_from_validates() {
    let key = CacheKey::try_from("user_123".to_string()).unwrap();
    assert_eq!(key.as_str(), "user_123");

    assert!(matches!(
        CacheKey::try_from(String::new()).unwrap_err(),
        TidewayError::InvalidCacheKey(_)
    ));
    assert!(matches!(
        CacheKey::try_from("a:b".to_string()).unwrap_err(),
        TidewayError::InvalidCacheKey(_)
    ));
    assert!(matches!(
        CacheKey::try_from("x".repeat(256)).unwrap_err(),
        TidewayError::InvalidCacheKey(_)
    ));
}

#[test]
fn key_format_is_namespace_prefix_key() {
    let key = CacheKey::try_from("orders").unwrap();
    let prefix = CacheKey::try_from("billing").unwrap();

    assert_eq!(format_cache_key(Some(&prefix), &key), "tideway:billing:orders");
    assert_eq!(format_cache_key(None, &key), "tideway::orders");
    assert_eq!(format_metric_key(&key), "tideway_metric:orders");
}

#[test]
fn key_source_resolves_fixed_and_dynamic() {
    let fixed = KeySource::from(CacheKey::try_from("orders").unwrap());
    assert_eq!(fixed.resolve().unwrap().as_str(), "orders");

    let dynamic = KeySource::dynamic(|| "computed".to_string());
    assert_eq!(dynamic.resolve().unwrap().as_str(), "computed");

    let invalid = KeySource::dynamic(|| "with:colon".to_string());
    assert!(matches!(
        invalid.resolve().unwrap_err(),
        TidewayError::InvalidCacheKey(_)
    ));
}

#[test]
fn defaults_match_documented_values() {
    let defaults = ThrottlerDefaults::default();
    assert!(defaults.enable_sleep_wait);
    assert!(defaults.enable_pipeline);
    assert!(!defaults.enable_metric_record);
    assert_eq!(defaults.max_retry_times, None);
    assert_eq!(defaults.max_retry_duration, None);
    assert_eq!(defaults.eviction_slack, Duration::from_millis(1));
}

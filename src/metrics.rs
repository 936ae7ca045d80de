use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    CacheKey, TidewayError,
    config::{CACHE_KEY_TTL_SECS, METRIC_NAMESPACE, format_metric_key},
    runtime::now_secs,
};

/// One recorded admission decision.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
    /// Unique id of the record.
    pub id: String,
    /// Full Redis key the record was read from.
    pub metric_key: String,
    /// Operation key the record belongs to.
    pub key: String,
    /// Window cardinality observed at admission time.
    pub count: u64,
    /// Admission time, seconds since epoch.
    pub timestamp: f64,
}

/// Reads admission metrics recorded by throttlers with
/// `enable_metric_record` on.
///
/// A reader covers a bounded time range; the default range is the trailing
/// hour, matching the rolling window metric keys are pruned to.
pub struct MetricReader {
    client: ConnectionManager,
    start: f64,
    end: f64,
}

impl MetricReader {
    /// Create a reader over the trailing hour.
    pub fn new(client: ConnectionManager) -> Self {
        Self::with_range(client, None, None)
    }

    /// Create a reader over `[start, end]` (epoch seconds). Unset bounds
    /// fall back to now and one hour before the end, rounded outward to
    /// whole seconds.
    pub fn with_range(client: ConnectionManager, start: Option<f64>, end: Option<f64>) -> Self {
        let end = end.unwrap_or_else(now_secs).ceil();
        let start = start.unwrap_or(end - CACHE_KEY_TTL_SECS as f64).floor();
        Self { client, start, end }
    }

    /// Load the records for one operation key.
    pub async fn load(&self, key: &CacheKey) -> Result<Vec<MetricData>, TidewayError> {
        self.load_key(&format_metric_key(key)).await
    }

    /// Load the records for every operation key in the metric namespace.
    pub async fn load_all(&self) -> Result<Vec<MetricData>, TidewayError> {
        let mut conn = self.client.clone();
        let keys: Vec<String> = conn.keys(format!("{METRIC_NAMESPACE}:*")).await?;

        let mut metrics = Vec::new();
        for key in keys {
            metrics.extend(self.load_key(&key).await?);
        }
        Ok(metrics)
    }

    /// Delete the records for one operation key. Idempotent.
    pub async fn reset(&self, key: &CacheKey) -> Result<(), TidewayError> {
        let mut conn = self.client.clone();
        let _: u64 = conn.del(format_metric_key(key)).await?;
        Ok(())
    }

    /// Delete every key in the metric namespace.
    pub async fn reset_all(&self) -> Result<(), TidewayError> {
        let mut conn = self.client.clone();
        let keys: Vec<String> = conn.keys(format!("{METRIC_NAMESPACE}:*")).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let _: u64 = conn.del(keys).await?;
        Ok(())
    }

    async fn load_key(&self, metric_key: &str) -> Result<Vec<MetricData>, TidewayError> {
        let mut conn = self.client.clone();
        let raw: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(metric_key, self.start, self.end)
            .await?;
        Ok(format_metrics(metric_key, raw))
    }
}

/// Parse raw `(member, score)` pairs into [`MetricData`], skipping members
/// that do not look like `<count>:<id>`.
pub(crate) fn format_metrics(metric_key: &str, raw: Vec<(String, f64)>) -> Vec<MetricData> {
    let key = metric_key
        .split_once(':')
        .map(|(_, key)| key)
        .unwrap_or(metric_key);

    raw.into_iter()
        .filter_map(|(member, timestamp)| {
            let (count, id) = member.split_once(':')?;
            let count = count.parse().ok()?;
            Some(MetricData {
                id: id.to_string(),
                metric_key: metric_key.to_string(),
                key: key.to_string(),
                count,
                timestamp,
            })
        })
        .collect()
}

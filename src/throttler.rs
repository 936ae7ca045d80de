use std::{future::Future, time::Duration};

use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    ThrottlerDefaults, ThrottlerOptions, TidewayError,
    config::{CACHE_KEY_TTL_SECS, ThrottlerConfig},
    rate::YEAR_SECS,
    runtime::{now_secs, sleep},
};

/// Distributed rate limiter for a single operation key.
///
/// Every attempt is tagged with a caller-chosen unique string and decided
/// against a shared sorted set: members are tags, scores are admission
/// timestamps. An attempt first inserts its tag with a far-future score so
/// concurrent eviction cannot drop it mid-decision, then reads the window
/// cardinality. Admitted tags get their score rewritten to the admission
/// time; rejected tags are removed and a wait time is computed from the
/// oldest admission still in the window.
///
/// # Consistency semantics
///
/// The admission commands run as one pipelined batch, which shrinks the
/// decision race to a single round trip but is not a transaction: two
/// concurrent callers can both observe a free slot and both be admitted.
/// This is best-effort limiting, not linearizable admission.
///
/// # Examples
///
/// ```ignore
/// let throttler = Throttler::new(options).await?;
///
/// // Either drive the loop yourself...
/// throttler.wait("request-1").await?;
///
/// // ...or wrap the call.
/// let response = throttler.guard("request-2", || api.search(query)).await?;
/// ```
pub struct Throttler {
    client: ConnectionManager,
    config: ThrottlerConfig,
}

impl Throttler {
    /// Create a new [`Throttler`] with the stock [`ThrottlerDefaults`].
    ///
    /// Fails fast when the rate or key cannot be resolved, or when Redis
    /// does not answer a `PING`.
    pub async fn new(options: ThrottlerOptions) -> Result<Self, TidewayError> {
        Self::with_defaults(options, &ThrottlerDefaults::default()).await
    }

    /// Create a new [`Throttler`], filling unset options from `defaults`.
    ///
    /// The merge happens here, once; the resulting configuration is
    /// immutable for the lifetime of the throttler.
    pub async fn with_defaults(
        options: ThrottlerOptions,
        defaults: &ThrottlerDefaults,
    ) -> Result<Self, TidewayError> {
        let (client, config) = options.resolve(defaults)?;
        let throttler = Self { client, config };
        throttler.check_connection().await?;
        Ok(throttler)
    }

    /// The full window key in Redis, `tideway:<prefix>:<key>`.
    pub fn cache_key(&self) -> &str {
        &self.config.cache_key
    }

    /// The metric key in Redis, `tideway_metric:<key>`.
    pub fn metric_key(&self) -> &str {
        &self.config.metric_key
    }

    /// Single non-blocking admission attempt.
    ///
    /// Returns `0.0` when admitted, otherwise the suggested wait in seconds
    /// before retrying under the same tag.
    pub async fn try_limit(&self, tag: &str) -> Result<f64, TidewayError> {
        let now = now_secs();
        let start = now - self.config.rate.interval();

        let count = self.request_count(start, tag, now).await?;
        if count > self.config.rate.max_requests() {
            let wait = self.wait_time(start, now, tag).await?;
            tracing::debug!(
                "throttle.reject, key: {}, count: {count}, wait: {wait:.4}s",
                self.config.cache_key
            );
            return Ok(wait);
        }

        self.record_metric(count).await;
        self.confirm(tag).await?;
        tracing::trace!(
            "throttle.admit, key: {}, count: {count}",
            self.config.cache_key
        );
        Ok(0.0)
    }

    /// Block until admitted, or fail with one of the retry errors.
    ///
    /// Retries indefinitely when sleeping is enabled and neither retry cap
    /// is set. When sleeping is disabled, the first rejection fails with
    /// [`TidewayError::TooManyRequests`].
    pub async fn wait(&self, tag: &str) -> Result<(), TidewayError> {
        let mut retry_times = 0u32;
        let started = now_secs();

        loop {
            let wait_secs = self.try_limit(tag).await?;
            if wait_secs == 0.0 {
                return Ok(());
            }
            retry_times += 1;
            self.check_retry_times(tag, retry_times)?;
            self.check_retry_duration(tag, started, wait_secs)?;
            if !self.config.enable_sleep_wait {
                return Err(TidewayError::TooManyRequests);
            }
            sleep(Duration::from_secs_f64(wait_secs)).await;
        }
    }

    /// Wait for admission, then run `operation` and return its output.
    ///
    /// Errors from [`wait`](Self::wait) surface without invoking the
    /// operation.
    pub async fn guard<F, Fut, T>(&self, tag: &str, operation: F) -> Result<T, TidewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.wait(tag).await?;
        Ok(operation().await)
    }

    /// Delete the window key. Idempotent on a missing key.
    ///
    /// Administrative operation; callers must serialize it against active
    /// admission attempts themselves.
    pub async fn reset(&self) -> Result<(), TidewayError> {
        let mut conn = self.client.clone();
        let _: u64 = conn.del(self.config.cache_key.as_str()).await?;
        Ok(())
    }

    /// Count the requests in the current window, reserving `tag` a slot.
    ///
    /// One batch: evict members below the window start (minus slack),
    /// insert `tag` with a far-future score so concurrent eviction cannot
    /// remove it before this decision lands, read the cardinality, and
    /// refresh the safety TTL.
    async fn request_count(&self, start: f64, tag: &str, now: f64) -> Result<u64, TidewayError> {
        let key = self.config.cache_key.as_str();
        let evict_below = start - self.config.eviction_slack.as_secs_f64();
        let reserve_score = now + YEAR_SECS;
        let mut conn = self.client.clone();

        if self.config.enable_pipeline {
            let mut pipe = redis::pipe();
            pipe.zrembyscore(key, 0f64, evict_below)
                .zadd(key, tag, reserve_score)
                .zcard(key)
                .expire(key, CACHE_KEY_TTL_SECS);
            let (_evicted, _reserved, count, _expired): (u64, u64, u64, bool) =
                pipe.query_async(&mut conn).await?;
            Ok(count)
        } else {
            let _: u64 = conn.zrembyscore(key, 0f64, evict_below).await?;
            let _: u64 = conn.zadd(key, tag, reserve_score).await?;
            let count: u64 = conn.zcard(key).await?;
            let _: bool = conn.expire(key, CACHE_KEY_TTL_SECS).await?;
            Ok(count)
        }
    }

    /// Undo the reservation for a rejected `tag` and compute the wait.
    ///
    /// The wait is half the time until the oldest in-window admission
    /// expires; halving biases retries to be slightly eager, so the next
    /// attempt re-measures instead of oversleeping. With no in-window
    /// member left (or a zero result), fall back to half the window.
    async fn wait_time(&self, start: f64, now: f64, tag: &str) -> Result<f64, TidewayError> {
        let key = self.config.cache_key.as_str();
        let interval = self.config.rate.interval();
        let mut conn = self.client.clone();

        let earliest: Vec<(String, f64)> = if self.config.enable_pipeline {
            let mut pipe = redis::pipe();
            pipe.zrem(key, tag)
                .zrangebyscore_limit_withscores(key, start, now, 0, 1);
            let (_dropped, earliest): (u64, Vec<(String, f64)>) =
                pipe.query_async(&mut conn).await?;
            earliest
        } else {
            let _: u64 = conn.zrem(key, tag).await?;
            conn.zrangebyscore_limit_withscores(key, start, now, 0, 1)
                .await?
        };

        let Some((_, earliest_score)) = earliest.first() else {
            return Ok(interval / 2.0);
        };
        let wait = (earliest_score + interval - now) / 2.0;
        if wait == 0.0 {
            return Ok(interval / 2.0);
        }
        Ok(wait)
    }

    /// Rewrite the admitted tag's score from the reservation sentinel to
    /// the actual admission time.
    async fn confirm(&self, tag: &str) -> Result<(), TidewayError> {
        let mut conn = self.client.clone();
        let _: u64 = conn
            .zadd(self.config.cache_key.as_str(), tag, now_secs())
            .await?;
        Ok(())
    }

    fn check_retry_times(&self, tag: &str, retry_times: u32) -> Result<(), TidewayError> {
        match self.config.max_retry_times {
            Some(max) if retry_times > max => Err(TidewayError::TooManyRetries {
                tag: tag.to_string(),
                times: retry_times,
            }),
            _ => Ok(()),
        }
    }

    /// Fail before sleeping when the projected completion would overrun
    /// the duration cap.
    fn check_retry_duration(
        &self,
        tag: &str,
        started: f64,
        wait_secs: f64,
    ) -> Result<(), TidewayError> {
        let Some(max) = self.config.max_retry_duration else {
            return Ok(());
        };
        let expected = started + max.as_secs_f64();
        let actual = now_secs() + wait_secs;
        if actual > expected {
            return Err(TidewayError::RetryTimeout {
                tag: tag.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Best-effort metric record; never fails the admission path.
    async fn record_metric(&self, count: u64) {
        if !self.config.enable_metric_record {
            return;
        }
        if let Err(err) = self.push_metric(count).await {
            tracing::warn!(
                "metric.record.error, key: {}, error: {err:?}",
                self.config.metric_key
            );
        }
    }

    async fn push_metric(&self, count: u64) -> Result<(), TidewayError> {
        let key = self.config.metric_key.as_str();
        let now = now_secs();
        let member = format!("{count}:{}", uuid::Uuid::new_v4());
        let prune_below = now - CACHE_KEY_TTL_SECS as f64;
        let mut conn = self.client.clone();

        if self.config.enable_pipeline {
            let mut pipe = redis::pipe();
            pipe.zrembyscore(key, 0f64, prune_below)
                .ignore()
                .zadd(key, member.as_str(), now)
                .ignore()
                .expire(key, CACHE_KEY_TTL_SECS)
                .ignore();
            let _: () = pipe.query_async(&mut conn).await?;
        } else {
            let _: u64 = conn.zrembyscore(key, 0f64, prune_below).await?;
            let _: u64 = conn.zadd(key, member.as_str(), now).await?;
            let _: bool = conn.expire(key, CACHE_KEY_TTL_SECS).await?;
        }
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), TidewayError> {
        let mut conn = self.client.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

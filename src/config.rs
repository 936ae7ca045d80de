use std::{fmt, ops::Deref, sync::Arc, time::Duration};

use redis::aio::ConnectionManager;

use crate::{Rate, TidewayError};

/// Namespace prepended to every window key.
pub(crate) const NAMESPACE: &str = "tideway";

/// Namespace prepended to every metric key.
pub(crate) const METRIC_NAMESPACE: &str = "tideway_metric";

/// Safety TTL applied to window and metric keys so that abandoned keys do
/// not leak memory.
pub(crate) const CACHE_KEY_TTL_SECS: i64 = 3600;

const DEFAULT_EVICTION_SLACK: Duration = Duration::from_millis(1);

/// A validated key segment.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons (colons separate segments of the full
///   `namespace:prefix:key` cache key)
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// View the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for CacheKey {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = TidewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TidewayError::InvalidCacheKey(
                "cache key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TidewayError::InvalidCacheKey(
                "cache key must not be longer than 255 bytes".to_string(),
            ))
        } else if value.contains(':') {
            Err(TidewayError::InvalidCacheKey(
                "cache key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = TidewayError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Where the window key for a throttler comes from.
///
/// Either a fixed key, or a zero-argument function producing one. A dynamic
/// source is invoked exactly once, when the throttler is constructed.
#[derive(Clone)]
pub enum KeySource {
    /// A fixed, pre-validated key.
    Fixed(CacheKey),
    /// A function producing the key string at construction time.
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl KeySource {
    /// Build a dynamic key source from a closure.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    pub(crate) fn resolve(&self) -> Result<CacheKey, TidewayError> {
        match self {
            Self::Fixed(key) => Ok(key.clone()),
            Self::Dynamic(f) => CacheKey::try_from(f()),
        }
    }
}

impl From<CacheKey> for KeySource {
    fn from(key: CacheKey) -> Self {
        Self::Fixed(key)
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            Self::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

/// Default values for the optional throttler knobs.
///
/// Pass a customized value to [`Throttler::with_defaults`] to share one set
/// of defaults across many throttlers; unset [`ThrottlerOptions`] fields
/// fall back to it in a single merge step at construction.
///
/// [`Throttler::with_defaults`]: crate::Throttler::with_defaults
#[derive(Clone, Debug)]
pub struct ThrottlerDefaults {
    /// Sleep and retry after a rejection instead of failing immediately.
    pub enable_sleep_wait: bool,
    /// Execute the admission commands as one pipelined batch.
    pub enable_pipeline: bool,
    /// Record a metric entry per admission.
    pub enable_metric_record: bool,
    /// Cap on the number of retries per call, if any.
    pub max_retry_times: Option<u32>,
    /// Cap on the total retry duration per call, if any.
    pub max_retry_duration: Option<Duration>,
    /// Slack subtracted from the eviction boundary to avoid flapping on
    /// window edges.
    pub eviction_slack: Duration,
}

impl Default for ThrottlerDefaults {
    fn default() -> Self {
        Self {
            enable_sleep_wait: true,
            enable_pipeline: true,
            enable_metric_record: false,
            max_retry_times: None,
            max_retry_duration: None,
            eviction_slack: DEFAULT_EVICTION_SLACK,
        }
    }
}

/// Configuration for a [`Throttler`](crate::Throttler).
///
/// `client`, `rate` and `key` are required; every other field falls back to
/// [`ThrottlerDefaults`] when `None`.
///
/// # Examples
///
/// ```ignore
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let client = client.get_connection_manager().await?;
///
/// let options = ThrottlerOptions {
///     client,
///     rate: "20/5s".parse()?,
///     key: KeySource::from(CacheKey::try_from("orders".to_string())?),
///     key_prefix: Some(CacheKey::try_from("billing".to_string())?),
///     enable_sleep_wait: None,
///     max_retry_times: Some(3),
///     max_retry_duration: None,
///     enable_pipeline: None,
///     enable_metric_record: Some(true),
///     eviction_slack: None,
/// };
/// ```
#[derive(Clone)]
pub struct ThrottlerOptions {
    /// Redis connection manager from the `redis` crate.
    ///
    /// Use `ConnectionManager` for automatic reconnection; clones share the
    /// underlying connection.
    pub client: ConnectionManager,

    /// The admission rate, e.g. `"100/s".parse()?`.
    pub rate: Rate,

    /// The window key. All callers sharing a resolved key (across every
    /// process pointed at the same Redis) share one admission budget.
    pub key: KeySource,

    /// Optional prefix segment for the window key.
    ///
    /// The full key is `tideway:<key_prefix>:<key>`, with an empty prefix
    /// segment when unset.
    pub key_prefix: Option<CacheKey>,

    /// Sleep and retry after a rejection; rejections fail with
    /// `TooManyRequests` when disabled.
    pub enable_sleep_wait: Option<bool>,

    /// Cap on retries per call; exceeding it fails with `TooManyRetries`.
    pub max_retry_times: Option<u32>,

    /// Cap on total retry duration per call; a projected overrun fails
    /// with `RetryTimeout` before the sleep is entered.
    pub max_retry_duration: Option<Duration>,

    /// Execute the admission commands as one pipelined batch. Disable for
    /// stores lacking batch support; decisions are identical, the race
    /// window is just wider.
    pub enable_pipeline: Option<bool>,

    /// Record one metric entry per admission under the metric key.
    pub enable_metric_record: Option<bool>,

    /// Slack subtracted from the eviction boundary.
    pub eviction_slack: Option<Duration>,
}

impl fmt::Debug for ThrottlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlerOptions")
            .field("client", &"<ConnectionManager>")
            .field("rate", &self.rate)
            .field("key", &self.key)
            .field("key_prefix", &self.key_prefix)
            .field("enable_sleep_wait", &self.enable_sleep_wait)
            .field("max_retry_times", &self.max_retry_times)
            .field("max_retry_duration", &self.max_retry_duration)
            .field("enable_pipeline", &self.enable_pipeline)
            .field("enable_metric_record", &self.enable_metric_record)
            .field("eviction_slack", &self.eviction_slack)
            .finish()
    }
}

impl ThrottlerOptions {
    pub(crate) fn resolve(
        self,
        defaults: &ThrottlerDefaults,
    ) -> Result<(ConnectionManager, ThrottlerConfig), TidewayError> {
        let key = self.key.resolve()?;

        let config = ThrottlerConfig {
            rate: self.rate,
            cache_key: format_cache_key(self.key_prefix.as_ref(), &key),
            metric_key: format_metric_key(&key),
            enable_sleep_wait: self.enable_sleep_wait.unwrap_or(defaults.enable_sleep_wait),
            enable_pipeline: self.enable_pipeline.unwrap_or(defaults.enable_pipeline),
            enable_metric_record: self
                .enable_metric_record
                .unwrap_or(defaults.enable_metric_record),
            max_retry_times: self.max_retry_times.or(defaults.max_retry_times),
            max_retry_duration: self.max_retry_duration.or(defaults.max_retry_duration),
            eviction_slack: self.eviction_slack.unwrap_or(defaults.eviction_slack),
        };

        Ok((self.client, config))
    }
}

/// Resolved, immutable runtime configuration.
#[derive(Clone, Debug)]
pub(crate) struct ThrottlerConfig {
    pub rate: Rate,
    pub cache_key: String,
    pub metric_key: String,
    pub enable_sleep_wait: bool,
    pub enable_pipeline: bool,
    pub enable_metric_record: bool,
    pub max_retry_times: Option<u32>,
    pub max_retry_duration: Option<Duration>,
    pub eviction_slack: Duration,
}

pub(crate) fn format_cache_key(prefix: Option<&CacheKey>, key: &CacheKey) -> String {
    let prefix = prefix.map(CacheKey::as_str).unwrap_or_default();
    format!("{NAMESPACE}:{prefix}:{}", key.as_str())
}

pub(crate) fn format_metric_key(key: &CacheKey) -> String {
    format!("{METRIC_NAMESPACE}:{}", key.as_str())
}

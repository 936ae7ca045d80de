/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum TidewayError {
    /// Rate expression did not match `<max_requests>/<period><unit>`.
    #[error("rate parse error, rate: {0}")]
    RateParse(String),

    /// Cache key or key prefix failed validation.
    #[error("invalid cache key: {0}")]
    InvalidCacheKey(String),

    /// The call was rejected and sleep-wait is disabled; the caller must
    /// retry later on its own.
    #[error("too many requests have reached the limit, and sleep wait is disabled")]
    TooManyRequests,

    /// The retry count cap was exceeded.
    #[error("too many retries have reached the limit, tag: {tag}, times: {times}")]
    TooManyRetries {
        /// Tag of the failed call.
        tag: String,
        /// Number of retries performed.
        times: u32,
    },

    /// The retry duration cap was exceeded.
    #[error(
        "retry duration has reached the limit, tag: {tag}, expected: {expected}, actual: {actual}"
    )]
    RetryTimeout {
        /// Tag of the failed call.
        tag: String,
        /// Latest acceptable completion time, seconds since epoch.
        expected: f64,
        /// Projected completion time, seconds since epoch.
        actual: f64,
    },

    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

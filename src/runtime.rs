use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(all(feature = "redis-tokio", not(feature = "redis-smol")))]
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(crate) async fn sleep(duration: Duration) {
    smol::Timer::after(duration).await;
}

/// Seconds since the unix epoch on this caller's clock. Scores in the
/// window set use the same unit.
pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

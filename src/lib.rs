#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod throttler;
pub use throttler::*;

mod config;
pub use config::{CacheKey, KeySource, ThrottlerDefaults, ThrottlerOptions};

mod rate;
pub use rate::Rate;

mod metrics;
pub use metrics::*;

mod error;
pub use error::*;

mod runtime;

#[cfg(test)]
mod tests;

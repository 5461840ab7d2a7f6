//! Infrastructure layer: configuration, stores, queue, workers, cache, rate limiting.

pub mod best_effort;
pub mod cache;
pub mod config;
pub mod intake;
pub mod jobs;
pub mod queries;
pub mod ratelimit;
pub mod records;
#[cfg(feature = "redis")]
pub mod redis_conn;

pub use best_effort::best_effort;
pub use config::{AppConfig, ConfigError};

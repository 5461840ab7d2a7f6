//! Process configuration loaded from environment variables.
//!
//! Every knob has a default suitable for local development; an unparsable value
//! is an error rather than a silent fallback.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Upload validation limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    pub max_query_chars: usize,
    /// Leading pages probed for extractable text.
    pub probe_pages: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data"),
            max_upload_bytes: 100 * 1024 * 1024,
            allowed_mime_types: vec!["application/pdf".to_string()],
            max_query_chars: 2000,
            probe_pages: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for list endpoints.
    pub short_ttl: Duration,
    /// TTL for immutable detail records (including finished jobs).
    pub long_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: Duration::from_secs(60),
            long_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub name: String,
    pub concurrency: usize,
    pub pop_timeout: Duration,
    /// Delay before retrying after a queue error.
    pub error_backoff: Duration,
    pub job_retention: Duration,
    /// Jobs stuck in `processing` longer than this are failed by the reaper.
    pub stall_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "pdf-worker".to_string(),
            concurrency: 2,
            pop_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            job_retention: Duration::from_secs(7 * 24 * 60 * 60),
            stall_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: Option<String>,
    pub use_persistent_stores: bool,
    pub redis_url: String,
    pub database_url: Option<String>,
    /// Run a worker pool inside the API process.
    pub embedded_worker: bool,
    pub intake: IntakeConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: None,
            use_persistent_stores: false,
            redis_url: "redis://localhost:6379/0".to_string(),
            database_url: None,
            embedded_worker: true,
            intake: IntakeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let d = Self::default();

        let allowed_mime_types = match env.string("ALLOWED_UPLOAD_MIME_TYPES") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => d.intake.allowed_mime_types,
        };

        Ok(Self {
            host: env.string("API_HOST").unwrap_or(d.host),
            port: env.parse("API_PORT")?.unwrap_or(d.port),
            jwt_secret: env.string("JWT_SECRET"),
            use_persistent_stores: env.flag("USE_PERSISTENT_STORES")?.unwrap_or(false),
            redis_url: env.string("REDIS_URL").unwrap_or(d.redis_url),
            database_url: env.string("DATABASE_URL"),
            embedded_worker: env.flag("EMBEDDED_WORKER")?.unwrap_or(d.embedded_worker),
            intake: IntakeConfig {
                upload_dir: env.string("UPLOAD_DIR").map(PathBuf::from).unwrap_or(d.intake.upload_dir),
                max_upload_bytes: env.parse("MAX_UPLOAD_SIZE_BYTES")?.unwrap_or(d.intake.max_upload_bytes),
                allowed_mime_types,
                max_query_chars: env.parse("MAX_QUERY_CHARS")?.unwrap_or(d.intake.max_query_chars),
                probe_pages: d.intake.probe_pages,
            },
            rate_limit: RateLimitConfig {
                window: env.secs("RATE_LIMIT_WINDOW_SECONDS")?.unwrap_or(d.rate_limit.window),
                max_requests: env.parse("RATE_LIMIT_MAX_REQUESTS")?.unwrap_or(d.rate_limit.max_requests),
            },
            cache: CacheConfig {
                short_ttl: env.secs("CACHE_TTL_DEFAULT_SECONDS")?.unwrap_or(d.cache.short_ttl),
                long_ttl: env.secs("CACHE_TTL_LONG_SECONDS")?.unwrap_or(d.cache.long_ttl),
            },
            worker: WorkerConfig {
                name: d.worker.name,
                concurrency: env.parse::<usize>("WORKER_CONCURRENCY")?.map_or(d.worker.concurrency, |n| n.max(1)),
                pop_timeout: env.secs("WORKER_POP_TIMEOUT_SECS")?.unwrap_or(d.worker.pop_timeout),
                error_backoff: d.worker.error_backoff,
                job_retention: env.secs("JOB_RETENTION_SECS")?.unwrap_or(d.worker.job_retention),
                stall_timeout: env.secs("JOB_STALL_TIMEOUT_SECS")?.unwrap_or(d.worker.stall_timeout),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(None),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: "expected a boolean".into(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.rate_limit.max_requests, 30);
        assert_eq!(cfg.rate_limit.window, Duration::from_secs(60));
        assert_eq!(cfg.intake.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.intake.allowed_mime_types, vec!["application/pdf"]);
        assert_eq!(cfg.worker.pop_timeout, Duration::from_secs(5));
        assert_eq!(cfg.worker.job_retention, Duration::from_secs(604_800));
        assert!(!cfg.use_persistent_stores);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("RATE_LIMIT_MAX_REQUESTS", "5"),
            ("CACHE_TTL_LONG_SECONDS", "900"),
            ("USE_PERSISTENT_STORES", "true"),
            ("ALLOWED_UPLOAD_MIME_TYPES", "application/pdf, Application/X-PDF"),
            ("WORKER_CONCURRENCY", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.cache.long_ttl, Duration::from_secs(900));
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.intake.allowed_mime_types, vec!["application/pdf", "application/x-pdf"]);
        assert_eq!(cfg.worker.concurrency, 1);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = load(&[("API_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "API_PORT", .. }));
    }

    #[test]
    fn bad_flags_are_rejected() {
        let err = load(&[("EMBEDDED_WORKER", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "EMBEDDED_WORKER", .. }));
    }
}

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where inputs are read from and outputs are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub materials_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Paths {
    pub fn new(materials_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            materials_dir: materials_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Master list of collection names.
    pub fn collection_list(&self) -> PathBuf {
        self.materials_dir.join("file_list.txt")
    }

    pub fn url_list(&self, collection: &str) -> PathBuf {
        self.materials_dir.join(format!("{collection}.txt"))
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.output_dir.join("collections")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.output_dir.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new("materials", "output")
    }
}

/// Per-URL retry behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Treat 404 like any other retryable HTTP status instead of a terminal
    /// "not found".
    pub escalate_not_found: bool,
    /// Report timeouts as terminal failures immediately instead of retrying.
    pub soft_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            escalate_not_found: false,
            soft_timeouts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_concurrent: usize,
    pub requests_per_second: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Random pause taken after admission and before each request.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub user_agents: Vec<String>,
    pub default_headers: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            requests_per_second: 20,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            jitter_min: Duration::from_millis(10),
            jitter_max: Duration::from_millis(100),
            user_agents: default_user_agents(),
            default_headers: default_headers(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:122.0) Gecko/20100101 Firefox/122.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_headers() -> Vec<(String, String)> {
    [
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("DNT", "1"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Cache-Control", "max-age=0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Copy the previous collection file to `<name>.json.backup` before
    /// replacing it.
    pub backup: bool,
    /// Dirty collections older than this are saved after an upsert.
    pub auto_flush_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backup: true,
            auto_flush_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_settle_delay: Duration,
    /// Flush store and cache after this many processed URLs.
    pub checkpoint_interval: usize,
    /// Minimum time between two progress reports.
    pub progress_interval: Duration,
    /// URL list lines not starting with this are discarded.
    pub url_prefix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_settle_delay: Duration::from_millis(500),
            checkpoint_interval: 1000,
            progress_interval: Duration::from_secs(5),
            url_prefix: "https://t.me/nft/".to_string(),
        }
    }
}

/// Complete engine configuration, built once and handed to each component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub paths: Paths,
    pub fetch: FetchSettings,
    pub store: StoreSettings,
    pub pipeline: PipelineSettings,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            fetch: FetchSettings::default(),
            store: StoreSettings::default(),
            pipeline: PipelineSettings::default(),
            log_level: "INFO".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_paths(materials_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            paths: Paths::new(materials_dir.as_ref(), output_dir.as_ref()),
            ..Self::default()
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup, using the environment variable
    /// names (`MAX_CONCURRENT_REQUESTS`, `TIMEOUT`, ...).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_CONCURRENT_REQUESTS") {
            self.fetch.max_concurrent = parse_value("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("REQUESTS_PER_SECOND") {
            self.fetch.requests_per_second = parse_value("REQUESTS_PER_SECOND", &v)?;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.pipeline.batch_size = parse_value("BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("REQUEST_DELAY") {
            self.fetch.jitter_max = parse_seconds("REQUEST_DELAY", &v)?;
            self.fetch.jitter_min = self.fetch.jitter_min.min(self.fetch.jitter_max);
        }
        if let Some(v) = lookup("TIMEOUT") {
            self.fetch.request_timeout = parse_seconds("TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("RETRY_COUNT") {
            self.fetch.retry.max_attempts = parse_value("RETRY_COUNT", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("MATERIALS_DIR") {
            self.paths.materials_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".into()));
        }
        if self.fetch.requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "requests_per_second must be at least 1".into(),
            ));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.fetch.user_agents.is_empty() {
            return Err(ConfigError::Invalid("user agent pool is empty".into()));
        }
        if self.fetch.jitter_min > self.fetch.jitter_max {
            return Err(ConfigError::Invalid("jitter_min exceeds jitter_max".into()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.pipeline.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: err.to_string(),
        })
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_value(key, raw)?;
    Duration::try_from_secs_f64(secs).map_err(|err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

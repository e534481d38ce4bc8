//! Optional `harvest.ron` overrides, applied between the built-in defaults
//! and the environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use harvest_engine::EngineConfig;
use harvest_logging::harvest_info;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "harvest.ron";

/// Every field is optional; absent fields keep the value below them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub materials_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub log_level: Option<String>,

    pub max_concurrent: Option<usize>,
    pub requests_per_second: Option<u32>,
    pub timeout_secs: Option<f64>,
    pub retry_count: Option<usize>,
    pub backoff_base_secs: Option<f64>,
    pub backoff_max_secs: Option<f64>,
    pub jitter_min_ms: Option<u64>,
    pub jitter_max_ms: Option<u64>,
    pub escalate_not_found: Option<bool>,
    pub soft_timeouts: Option<bool>,
    pub user_agents: Option<Vec<String>>,

    pub backup: Option<bool>,
    pub auto_flush_secs: Option<u64>,

    pub batch_size: Option<usize>,
    pub batch_settle_ms: Option<u64>,
    pub checkpoint_interval: Option<usize>,
    pub progress_secs: Option<u64>,
    pub url_prefix: Option<String>,
}

impl FileSettings {
    /// Reads `path`; a missing file yields `None`.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let settings = ron::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(settings))
    }

    pub fn apply(&self, config: &mut EngineConfig) -> anyhow::Result<()> {
        if let Some(dir) = &self.materials_dir {
            config.paths.materials_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        let fetch = &mut config.fetch;
        set(&mut fetch.max_concurrent, self.max_concurrent);
        set(&mut fetch.requests_per_second, self.requests_per_second);
        if let Some(secs) = self.timeout_secs {
            fetch.request_timeout = seconds("timeout_secs", secs)?;
        }
        set(&mut fetch.retry.max_attempts, self.retry_count);
        if let Some(secs) = self.backoff_base_secs {
            fetch.retry.base_delay = seconds("backoff_base_secs", secs)?;
        }
        if let Some(secs) = self.backoff_max_secs {
            fetch.retry.max_delay = seconds("backoff_max_secs", secs)?;
        }
        if let Some(ms) = self.jitter_min_ms {
            fetch.jitter_min = Duration::from_millis(ms);
        }
        if let Some(ms) = self.jitter_max_ms {
            fetch.jitter_max = Duration::from_millis(ms);
        }
        set(&mut fetch.retry.escalate_not_found, self.escalate_not_found);
        set(&mut fetch.retry.soft_timeouts, self.soft_timeouts);
        if let Some(agents) = &self.user_agents {
            fetch.user_agents = agents.clone();
        }

        set(&mut config.store.backup, self.backup);
        if let Some(secs) = self.auto_flush_secs {
            config.store.auto_flush_interval = Duration::from_secs(secs);
        }

        let pipeline = &mut config.pipeline;
        set(&mut pipeline.batch_size, self.batch_size);
        if let Some(ms) = self.batch_settle_ms {
            pipeline.batch_settle_delay = Duration::from_millis(ms);
        }
        set(&mut pipeline.checkpoint_interval, self.checkpoint_interval);
        if let Some(secs) = self.progress_secs {
            pipeline.progress_interval = Duration::from_secs(secs);
        }
        if let Some(prefix) = &self.url_prefix {
            pipeline.url_prefix = prefix.clone();
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn seconds(key: &str, secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{key} must be a non-negative number"))
}

/// Defaults, then `settings_path` if it exists, then the environment.
pub fn build_config(settings_path: &Path) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::default();
    if let Some(file) = FileSettings::load(settings_path)? {
        file.apply(&mut config)?;
        harvest_info!("Applied settings from {}", settings_path.display());
    }
    config.apply_env().context("invalid environment override")?;
    Ok(config)
}

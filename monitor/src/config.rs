//! Daemon configuration
//!
//! Every section has defaults, so an absent file or a file with only a few
//! keys both work. CLI flags are applied on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::alerts::AlertConfig;
use crate::cli::Args;
use crate::error::{MonitorError, Result};
use crate::poller::PollConfig;

/// Upper bound for every day-based setting; keeps the derived durations
/// far away from chrono's limits.
const MAX_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sources: SourcesConfig,
    pub poll: PollSettings,
    pub thresholds: ThresholdConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub dashboard_url: Option<Url>,
    pub chain_url: Option<Url>,
    pub geo_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_concurrency: usize,
    pub geo_lookups_per_cycle: usize,
    pub geo_stale_days: i64,
    pub max_blocks_per_cycle: u64,
    pub block_retention_days: i64,
    pub validator_cache_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub phantom_block_pct: f64,
    pub phantom_block_window_hours: i64,
    pub stake_visibility_warning_pct: f64,
    pub stake_visibility_critical_pct: f64,
    pub alert_cooldown_secs: i64,
    pub bootstrapper_min_seen_by: i64,
    pub bootstrapper_min_age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jio_monitor.db"),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dashboard_url: None,
            chain_url: None,
            geo_url: Url::parse("http://ip-api.com/").ok(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            fetch_timeout_secs: defaults.fetch_timeout.as_secs(),
            fetch_concurrency: defaults.fetch_concurrency,
            geo_lookups_per_cycle: defaults.geo_lookups_per_cycle,
            geo_stale_days: defaults.geo_stale_days,
            max_blocks_per_cycle: defaults.max_blocks_per_cycle,
            block_retention_days: defaults.block_retention.num_days(),
            validator_cache_ttl_secs: defaults.validator_cache_ttl.num_seconds(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let alerts = AlertConfig::default();
        let poll = PollConfig::default();
        Self {
            phantom_block_pct: alerts.phantom_block_threshold_pct,
            phantom_block_window_hours: alerts.phantom_block_window.num_hours(),
            stake_visibility_warning_pct: alerts.stake_visibility_warning_pct,
            stake_visibility_critical_pct: alerts.stake_visibility_critical_pct,
            alert_cooldown_secs: alerts.cooldown.num_seconds(),
            bootstrapper_min_seen_by: poll.bootstrapper_min_seen_by,
            bootstrapper_min_age_days: poll.bootstrapper_min_age_days,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
        }
    }
}

impl Config {
    /// Load configuration from file if it exists, otherwise use defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_secs == 0 {
            return Err(MonitorError::Config("poll.interval_secs must be positive".to_string()));
        }
        if self.poll.fetch_timeout_secs == 0 {
            return Err(MonitorError::Config("poll.fetch_timeout_secs must be positive".to_string()));
        }
        if self.poll.fetch_concurrency == 0 {
            return Err(MonitorError::Config("poll.fetch_concurrency must be positive".to_string()));
        }
        check_range("poll.block_retention_days", self.poll.block_retention_days, 1, MAX_DAYS)?;
        check_range("poll.geo_stale_days", self.poll.geo_stale_days, 0, MAX_DAYS)?;
        check_range("poll.validator_cache_ttl_secs", self.poll.validator_cache_ttl_secs, 0, MAX_DAYS * 86_400)?;
        check_range("thresholds.phantom_block_window_hours", self.thresholds.phantom_block_window_hours, 1, MAX_DAYS * 24)?;
        check_range("thresholds.alert_cooldown_secs", self.thresholds.alert_cooldown_secs, 0, MAX_DAYS * 86_400)?;
        check_range("thresholds.bootstrapper_min_age_days", self.thresholds.bootstrapper_min_age_days, 0, MAX_DAYS)?;
        if self.thresholds.stake_visibility_critical_pct > self.thresholds.stake_visibility_warning_pct {
            return Err(MonitorError::Config(
                "thresholds.stake_visibility_critical_pct must not exceed the warning threshold".to_string(),
            ));
        }
        if let Some(url) = &self.sources.chain_url {
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(MonitorError::Config(format!("sources.chain_url must be ws:// or wss://, got {}", url)));
            }
        }
        Ok(())
    }

    /// Override config with CLI arguments
    pub fn apply_cli_overrides(&mut self, args: &Args) {
        if let Some(database) = &args.database {
            self.database.path = database.clone();
        }

        if let Some(url) = &args.dashboard_url {
            self.sources.dashboard_url = Some(url.clone());
        }

        if let Some(url) = &args.chain_url {
            self.sources.chain_url = Some(url.clone());
        }

        if let Some(port) = args.api_port {
            self.api.port = port;
        }

        if let Some(interval) = args.interval_secs {
            self.poll.interval_secs = interval;
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.fetch_timeout_secs)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll.interval_secs),
            fetch_timeout: self.fetch_timeout(),
            fetch_concurrency: self.poll.fetch_concurrency,
            geo_lookups_per_cycle: self.poll.geo_lookups_per_cycle,
            geo_stale_days: self.poll.geo_stale_days,
            max_blocks_per_cycle: self.poll.max_blocks_per_cycle,
            block_retention: chrono::Duration::days(self.poll.block_retention_days),
            validator_cache_ttl: chrono::Duration::seconds(self.poll.validator_cache_ttl_secs),
            bootstrapper_min_seen_by: self.thresholds.bootstrapper_min_seen_by,
            bootstrapper_min_age_days: self.thresholds.bootstrapper_min_age_days,
        }
    }

    pub fn alert_config(&self) -> AlertConfig {
        AlertConfig {
            phantom_block_threshold_pct: self.thresholds.phantom_block_pct,
            phantom_block_window: chrono::Duration::hours(self.thresholds.phantom_block_window_hours),
            stake_visibility_warning_pct: self.thresholds.stake_visibility_warning_pct,
            stake_visibility_critical_pct: self.thresholds.stake_visibility_critical_pct,
            cooldown: chrono::Duration::seconds(self.thresholds.alert_cooldown_secs),
        }
    }
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(MonitorError::Config(format!("{} must be between {} and {}, got {}", name, min, max, value)))
    }
}

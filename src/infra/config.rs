//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config/dev.toml";
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Gateway identifier stamped on published event batches
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub ageout_hours: u64,
    pub ageout_interval_secs: u64,
    pub aggregate_departed_threshold_ms: u64,
    pub pos_departed_threshold_ms: u64,
    pub pos_return_threshold_ms: u64,
    pub read_rate_interval_secs: u64,
    pub persist_interval_secs: u64,
    pub stats_record_interval_secs: u64,
    pub waypoint_history_size: usize,
    pub snapshot_retention_days: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            ageout_hours: 336,
            ageout_interval_secs: 3600,
            aggregate_departed_threshold_ms: 30_000,
            pos_departed_threshold_ms: 3_600_000,
            pos_return_threshold_ms: 86_400_000,
            read_rate_interval_secs: 3,
            persist_interval_secs: 180,
            stats_record_interval_secs: 5,
            waypoint_history_size: 10,
            snapshot_retention_days: 21,
            shutdown_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: String,
    pub snapshot_dir: String,
    pub stats_dir: String,
    pub mobility_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: "cache".to_string(),
            snapshot_dir: "snapshot".to_string(),
            stats_dir: "stats".to_string(),
            mobility_dir: "config/mobility".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for event batch egress (JSONL format)
    #[serde(default = "default_events_file")]
    pub events_file: String,
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { events_file: default_events_file(), enabled: default_egress_enabled() }
    }
}

fn default_events_file() -> String {
    "events.jsonl".to_string()
}

fn default_egress_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    ageout_hours: u64,
    ageout_interval_secs: u64,
    aggregate_departed_threshold_ms: u64,
    pos_departed_threshold_ms: u64,
    pos_return_threshold_ms: u64,
    read_rate_interval_secs: u64,
    persist_interval_secs: u64,
    stats_record_interval_secs: u64,
    waypoint_history_size: usize,
    snapshot_retention_days: u64,
    shutdown_timeout_ms: u64,
    cache_dir: PathBuf,
    snapshot_dir: PathBuf,
    stats_dir: PathBuf,
    mobility_dir: PathBuf,
    events_file: String,
    egress_enabled: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let inv = toml_config.inventory;
        Self {
            site_id: toml_config.site.id,
            ageout_hours: inv.ageout_hours,
            ageout_interval_secs: inv.ageout_interval_secs,
            aggregate_departed_threshold_ms: inv.aggregate_departed_threshold_ms,
            pos_departed_threshold_ms: inv.pos_departed_threshold_ms,
            pos_return_threshold_ms: inv.pos_return_threshold_ms,
            read_rate_interval_secs: inv.read_rate_interval_secs,
            persist_interval_secs: inv.persist_interval_secs,
            stats_record_interval_secs: inv.stats_record_interval_secs,
            waypoint_history_size: inv.waypoint_history_size,
            snapshot_retention_days: inv.snapshot_retention_days,
            shutdown_timeout_ms: inv.shutdown_timeout_ms,
            cache_dir: PathBuf::from(toml_config.paths.cache_dir),
            snapshot_dir: PathBuf::from(toml_config.paths.snapshot_dir),
            stats_dir: PathBuf::from(toml_config.paths.stats_dir),
            mobility_dir: PathBuf::from(toml_config.paths.mobility_dir),
            events_file: toml_config.egress.events_file,
            egress_enabled: toml_config.egress.enabled,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        DEFAULT_CONFIG_FILE.to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli_path))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn ageout_hours(&self) -> u64 {
        self.ageout_hours
    }

    pub fn ageout_interval_secs(&self) -> u64 {
        self.ageout_interval_secs
    }

    pub fn aggregate_departed_threshold_ms(&self) -> u64 {
        self.aggregate_departed_threshold_ms
    }

    pub fn pos_departed_threshold_ms(&self) -> u64 {
        self.pos_departed_threshold_ms
    }

    pub fn pos_return_threshold_ms(&self) -> u64 {
        self.pos_return_threshold_ms
    }

    pub fn read_rate_interval_secs(&self) -> u64 {
        self.read_rate_interval_secs
    }

    pub fn persist_interval_secs(&self) -> u64 {
        self.persist_interval_secs
    }

    pub fn stats_record_interval_secs(&self) -> u64 {
        self.stats_record_interval_secs
    }

    pub fn waypoint_history_size(&self) -> usize {
        self.waypoint_history_size
    }

    pub fn snapshot_retention_days(&self) -> u64 {
        self.snapshot_retention_days
    }

    pub fn shutdown_timeout_ms(&self) -> u64 {
        self.shutdown_timeout_ms
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn stats_dir(&self) -> &Path {
        &self.stats_dir
    }

    pub fn mobility_dir(&self) -> &Path {
        &self.mobility_dir
    }

    pub fn events_file(&self) -> &str {
        &self.events_file
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Point every on-disk location below one root directory
    pub fn with_data_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        self.cache_dir = root.join("cache");
        self.snapshot_dir = root.join("snapshot");
        self.stats_dir = root.join("stats");
        self.mobility_dir = root.join("mobility");
        self
    }

    pub fn with_ageout_hours(mut self, hours: u64) -> Self {
        self.ageout_hours = hours;
        self
    }

    pub fn with_aggregate_departed_threshold_ms(mut self, ms: u64) -> Self {
        self.aggregate_departed_threshold_ms = ms;
        self
    }

    pub fn with_pos_thresholds(mut self, departed_ms: u64, return_ms: u64) -> Self {
        self.pos_departed_threshold_ms = departed_ms;
        self.pos_return_threshold_ms = return_ms;
        self
    }

    #[cfg(test)]
    pub fn with_waypoint_history_size(mut self, size: usize) -> Self {
        self.waypoint_history_size = size;
        self
    }

    #[cfg(test)]
    pub fn with_snapshot_retention_days(mut self, days: u64) -> Self {
        self.snapshot_retention_days = days;
        self
    }
}

//! Top-level configuration, loaded from `~/.krakenhashes/config.toml`.
//!
//! Every section derives `Default` and `#[serde(default)]` so a partial
//! config file (or none at all) is always valid.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load config from `~/.krakenhashes/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".krakenhashes")
            .join("config.toml")
    }
}

/// Every tunable system setting, with its production default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_max_concurrent_jobs_per_agent")]
    pub max_concurrent_jobs_per_agent: u32,
    #[serde(default = "default_chunk_duration_seconds")]
    pub default_chunk_duration_seconds: u64,
    #[serde(default = "default_chunk_fluctuation_percentage")]
    pub chunk_fluctuation_percentage: f64,
    #[serde(default = "default_benchmark_cache_duration_hours")]
    pub benchmark_cache_duration_hours: u64,
    #[serde(default = "default_max_chunk_retry_attempts")]
    pub max_chunk_retry_attempts: u32,
    #[serde(default = "default_task_heartbeat_timeout_minutes")]
    pub task_heartbeat_timeout_minutes: u64,
    #[serde(default = "default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,
    #[serde(default = "default_true")]
    pub rule_split_enabled: bool,
    #[serde(default = "default_rule_split_threshold")]
    pub rule_split_threshold: f64,
    #[serde(default = "default_rule_split_min_rules")]
    pub rule_split_min_rules: u64,
    #[serde(default = "default_rule_split_max_chunks")]
    pub rule_split_max_chunks: u64,
    #[serde(default)]
    pub job_interruption_enabled: bool,
    #[serde(default = "default_max_job_priority")]
    pub max_job_priority: i32,
    #[serde(default = "default_metrics_retention_realtime_days")]
    pub metrics_retention_realtime_days: u32,
    #[serde(default = "default_potfile_batch_interval_seconds")]
    pub potfile_batch_interval_seconds: u64,
    #[serde(default = "default_potfile_max_batch_size")]
    pub potfile_max_batch_size: u32,
    #[serde(default)]
    pub default_data_retention_months: u32,
    #[serde(default)]
    pub agent_scheduling_enabled: bool,
    #[serde(default = "default_agent_hashlist_retention_hours")]
    pub agent_hashlist_retention_hours: u64,
    #[serde(default = "default_reconnect_grace_minutes")]
    pub reconnect_grace_minutes: u64,
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    #[serde(default = "default_stale_sweep_interval_seconds")]
    pub stale_sweep_interval_seconds: u64,
    #[serde(default = "default_retention_sweep_interval_hours")]
    pub retention_sweep_interval_hours: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs_per_agent: default_max_concurrent_jobs_per_agent(),
            default_chunk_duration_seconds: default_chunk_duration_seconds(),
            chunk_fluctuation_percentage: default_chunk_fluctuation_percentage(),
            benchmark_cache_duration_hours: default_benchmark_cache_duration_hours(),
            max_chunk_retry_attempts: default_max_chunk_retry_attempts(),
            task_heartbeat_timeout_minutes: default_task_heartbeat_timeout_minutes(),
            task_timeout_minutes: default_task_timeout_minutes(),
            rule_split_enabled: true,
            rule_split_threshold: default_rule_split_threshold(),
            rule_split_min_rules: default_rule_split_min_rules(),
            rule_split_max_chunks: default_rule_split_max_chunks(),
            job_interruption_enabled: false,
            max_job_priority: default_max_job_priority(),
            metrics_retention_realtime_days: default_metrics_retention_realtime_days(),
            potfile_batch_interval_seconds: default_potfile_batch_interval_seconds(),
            potfile_max_batch_size: default_potfile_max_batch_size(),
            default_data_retention_months: 0,
            agent_scheduling_enabled: false,
            agent_hashlist_retention_hours: default_agent_hashlist_retention_hours(),
            reconnect_grace_minutes: default_reconnect_grace_minutes(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            stale_sweep_interval_seconds: default_stale_sweep_interval_seconds(),
            retention_sweep_interval_hours: default_retention_sweep_interval_hours(),
        }
    }
}

fn default_max_concurrent_jobs_per_agent() -> u32 {
    2
}
fn default_chunk_duration_seconds() -> u64 {
    1200
}
fn default_chunk_fluctuation_percentage() -> f64 {
    20.0
}
fn default_benchmark_cache_duration_hours() -> u64 {
    168
}
fn default_max_chunk_retry_attempts() -> u32 {
    3
}
fn default_task_heartbeat_timeout_minutes() -> u64 {
    5
}
fn default_task_timeout_minutes() -> u64 {
    5
}
fn default_rule_split_threshold() -> f64 {
    2.0
}
fn default_rule_split_min_rules() -> u64 {
    100
}
fn default_rule_split_max_chunks() -> u64 {
    1000
}
fn default_max_job_priority() -> i32 {
    1000
}
fn default_metrics_retention_realtime_days() -> u32 {
    7
}
fn default_potfile_batch_interval_seconds() -> u64 {
    60
}
fn default_potfile_max_batch_size() -> u32 {
    1000
}
fn default_agent_hashlist_retention_hours() -> u64 {
    24
}
fn default_reconnect_grace_minutes() -> u64 {
    5
}
fn default_scheduler_tick_seconds() -> u64 {
    5
}
fn default_stale_sweep_interval_seconds() -> u64 {
    60
}
fn default_retention_sweep_interval_hours() -> u64 {
    24
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.krakenhashes/krakenhashes.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_rule_chunk_root")]
    pub rule_chunk_root: String,
    #[serde(default = "default_potfile_path")]
    pub potfile_path: String,
    #[serde(default = "default_hashcat_binary")]
    pub hashcat_binary: String,
    /// The id of the system-owned wordlist row standing in for the potfile.
    /// Jobs referencing this id in `wordlist_ids` get their keyspace
    /// recomputed when the potfile's line count changes.
    #[serde(default = "default_potfile_wordlist_id")]
    pub potfile_wordlist_id: i64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rule_chunk_root: default_rule_chunk_root(),
            potfile_path: default_potfile_path(),
            hashcat_binary: default_hashcat_binary(),
            potfile_wordlist_id: default_potfile_wordlist_id(),
        }
    }
}

fn default_rule_chunk_root() -> String {
    "~/.krakenhashes/rule_splits".into()
}
fn default_potfile_path() -> String {
    "~/.krakenhashes/custom/potfile.txt".into()
}
fn default_hashcat_binary() -> String {
    "hashcat".into()
}
fn default_potfile_wordlist_id() -> i64 {
    1
}

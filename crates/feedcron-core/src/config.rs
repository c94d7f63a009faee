use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{FeedcronError, Result};
use crate::types::{Frequency, TenantKey, TimeOfDay};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_ERROR_STACK: u32 = 3;
pub const DEFAULT_STEP_DELAY_MINUTES: u32 = 5;
/// Upper bound for `step_delay_minutes`: one week.
pub const MAX_STEP_DELAY_MINUTES: u32 = 7 * 24 * 60;
/// A cron that has not finished a tick for 12 hours is reported as stale.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 12 * 60 * 60;
pub const DEFAULT_FEED_PREFIX: &str = "feed";
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 600;

/// Top-level config (feedcron.toml + FEEDCRON_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedcronConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which reading of the enable/disable guard the reconciler applies.
///
/// `Transition` only touches a process whose enabled-ness actually differs
/// from its tenant's configuration. `Legacy` reproduces the guard exactly as
/// earlier releases evaluated it: enabling re-runs on every pass for already
/// enabled processes, and disabling only fires for processes that are
/// already disabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ToggleGuard {
    #[default]
    Transition,
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone start times are expressed in (`"Europe/Madrid"`, `"UTC"`, `"+02:00"`, ...).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Timezone used when a time is composed without the configured zone.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Consecutive step failures tolerated before a cycle is abandoned.
    #[serde(default = "default_max_error_stack")]
    pub max_error_stack: u32,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub toggle_guard: ToggleGuard,
    /// Restrict every sweep to this tenant instead of all active tenants.
    #[serde(default)]
    pub pinned_tenant: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            default_timezone: default_timezone(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_error_stack: DEFAULT_MAX_ERROR_STACK,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            toggle_guard: ToggleGuard::default(),
            pinned_tenant: None,
        }
    }
}

/// Where finished and in-progress feed files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_feed_dir")]
    pub feed_dir: String,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
    #[serde(default = "default_feed_prefix")]
    pub prefix: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            feed_dir: default_feed_dir(),
            tmp_dir: default_tmp_dir(),
            prefix: default_feed_prefix(),
        }
    }
}

/// External command that performs one generation step.
///
/// The command receives `FEEDCRON_TENANT` and `FEEDCRON_OFFSET` in its
/// environment and prints a JSON step report on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// A step still running after this long counts as failed.
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

/// Per-tenant feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantEntry {
    pub key: TenantKey,
    /// Inactive tenants are skipped by sweeps entirely.
    #[serde(default = "bool_true")]
    pub active: bool,
    /// Whether cron-based generation is turned on for this tenant.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start_time: TimeOfDay,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default = "default_step_delay")]
    pub step_delay_minutes: u32,
}

fn bool_true() -> bool {
    true
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_max_error_stack() -> u32 {
    DEFAULT_MAX_ERROR_STACK
}
fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}
fn default_step_delay() -> u32 {
    DEFAULT_STEP_DELAY_MINUTES
}
fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}
fn default_feed_prefix() -> String {
    DEFAULT_FEED_PREFIX.to_string()
}
fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.feedcron", home)
}
fn default_db_path() -> String {
    format!("{}/feedcron.db", data_dir())
}
fn default_feed_dir() -> String {
    format!("{}/feeds", data_dir())
}
fn default_tmp_dir() -> String {
    format!("{}/tmp", data_dir())
}

impl FeedcronConfig {
    /// Load config from a TOML file with FEEDCRON_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `FEEDCRON_SCHEDULER__POLL_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: Self = Self::figment(&path)
            .extract()
            .map_err(|e| FeedcronError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        for tenant in &self.tenants {
            if tenant.step_delay_minutes > MAX_STEP_DELAY_MINUTES {
                return Err(FeedcronError::Config(format!(
                    "tenants.{}: step_delay_minutes {} exceeds {MAX_STEP_DELAY_MINUTES}",
                    tenant.key, tenant.step_delay_minutes
                )));
            }
        }
        Ok(())
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FEEDCRON_").split("__"))
    }

    pub fn tenant(&self, key: &TenantKey) -> Option<&TenantEntry> {
        self.tenants.iter().find(|t| &t.key == key)
    }
}

fn default_config_path() -> String {
    format!("{}/feedcron.toml", data_dir())
}

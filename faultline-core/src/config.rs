//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/faultline/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/faultline/` (~/.config/faultline/)
//! - State/Logs: `$XDG_STATE_HOME/faultline/` (~/.local/state/faultline/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Occurrence assembly settings
    #[serde(default)]
    pub notifier: NotifierSection,

    /// Sensitive field redaction
    #[serde(default)]
    pub scrub: ScrubConfig,

    /// Queue, retry and transport settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[notifier]` section
#[derive(Debug, Deserialize, Clone)]
pub struct NotifierSection {
    /// Project access token sent with every payload
    pub access_token: Option<String>,

    /// Deployment environment (e.g. "production")
    pub environment: Option<String>,

    /// Version of the reporting application
    pub code_version: Option<String>,

    /// Framework name reported with each occurrence
    pub framework: Option<String>,

    /// When false, reporting is a no-op
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Built-in providers to enable: `notifier`, `server`, `timestamp`
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Dotted occurrence paths to fingerprint on; empty uses the error fingerprint
    #[serde(default)]
    pub fingerprint_fields: Vec<String>,

    /// Shrink payloads above the size limit before sending
    #[serde(default = "default_truncate")]
    pub truncate_large_payloads: bool,

    /// How long the panic hook waits for the queue to drain
    #[serde(default = "default_panic_flush_timeout")]
    pub panic_flush_timeout_ms: u64,

    /// Telemetry events kept for the next occurrence (at most 100, 0 disables)
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            access_token: None,
            environment: None,
            code_version: None,
            framework: None,
            enabled: default_enabled(),
            providers: default_providers(),
            fingerprint_fields: vec![],
            truncate_large_payloads: default_truncate(),
            panic_flush_timeout_ms: default_panic_flush_timeout(),
            telemetry_capacity: default_telemetry_capacity(),
        }
    }
}

impl NotifierSection {
    /// Check if an access token is present
    pub fn is_ready(&self) -> bool {
        self.access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::Config(
                "notifier.access_token is required and must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn panic_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.panic_flush_timeout_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_providers() -> Vec<String> {
    vec![
        "notifier".to_string(),
        "server".to_string(),
        "timestamp".to_string(),
    ]
}

fn default_truncate() -> bool {
    true
}

fn default_panic_flush_timeout() -> u64 {
    2000
}

fn default_telemetry_capacity() -> usize {
    crate::telemetry::MAX_CAPACITY
}

/// `[scrub]` section
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ScrubConfig {
    /// Field names, globs or dotted paths to redact
    #[serde(default)]
    pub fields: Vec<String>,
}

/// `[delivery]` section
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Collection endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum queued payloads before the oldest is evicted
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retries after the first attempt for retriable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on any backoff delay in milliseconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// How long shutdown keeps draining the queue
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            send_timeout_secs: default_send_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl DeliveryConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config(
                "delivery.endpoint must not be empty".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "delivery.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.send_timeout_secs == 0 {
            return Err(Error::Config(
                "delivery.send_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(Error::Config(format!(
                "delivery.backoff_base_ms ({}) exceeds delivery.backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_cap() -> u64 {
    30_000
}

fn default_send_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.delivery.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/faultline/config.toml` (~/.config/faultline/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("faultline").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/faultline/` (~/.local/state/faultline/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("faultline")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/faultline/faultline.log` (~/.local/state/faultline/faultline.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("faultline.log")
    }
}

// Configuration management for the scheduler platform

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
    pub dispatch: DispatchSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Fallback timezone when neither the campaign nor the user carries one.
    pub default_timezone: String,
    /// Base re-arm interval while a window still has queued work, in ms.
    pub continuous_interval_ms: u64,
    /// Drains slower than this are considered slow and back off, in ms.
    pub slow_drain_threshold_ms: u64,
    /// Multiplier applied to a slow drain's duration to get the next interval.
    pub continuous_backoff_factor: f64,
    /// Ceiling for the backed-off continuous interval, in ms.
    pub max_continuous_interval_ms: u64,
    /// Maximum jobs claimed per drain cycle.
    pub drain_batch_size: i64,
    /// Sliding window after which an inactive user is dropped, in seconds.
    pub activity_timeout_seconds: u64,
    /// Safety-net full reload cadence, catching changes whose notifications
    /// were missed, in seconds.
    pub reconcile_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub prometheus_port: u16,
}

impl Settings {
    /// Load settings from the default `config/` directory.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_path("config")
    }

    /// Load settings from `{path}/default.toml`, overlaid with an optional
    /// `{path}/local.toml` and `APP__`-prefixed environment variables.
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, config::ConfigError> {
        let config_dir = config_dir.as_ref();

        let settings = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be greater than zero".to_string());
        }
        if chrono_tz::Tz::from_str(&self.scheduler.default_timezone).is_err() {
            return Err(format!(
                "scheduler.default_timezone is not a valid IANA timezone: {}",
                self.scheduler.default_timezone
            ));
        }
        if self.scheduler.continuous_interval_ms == 0 {
            return Err("scheduler.continuous_interval_ms must be greater than zero".to_string());
        }
        if self.scheduler.continuous_backoff_factor < 1.0 {
            return Err("scheduler.continuous_backoff_factor must be at least 1.0".to_string());
        }
        if self.scheduler.max_continuous_interval_ms < self.scheduler.continuous_interval_ms {
            return Err(
                "scheduler.max_continuous_interval_ms must not be below continuous_interval_ms"
                    .to_string(),
            );
        }
        if self.scheduler.drain_batch_size <= 0 {
            return Err("scheduler.drain_batch_size must be greater than zero".to_string());
        }
        if self.scheduler.activity_timeout_seconds == 0 {
            return Err("scheduler.activity_timeout_seconds must be greater than zero".to_string());
        }
        if self.scheduler.reconcile_interval_seconds == 0 {
            return Err("scheduler.reconcile_interval_seconds must be greater than zero".to_string());
        }
        if self.dispatch.endpoint.is_empty() {
            return Err("dispatch.endpoint must not be empty".to_string());
        }
        Ok(())
    }
}

impl SchedulerSettings {
    pub fn continuous_interval(&self) -> Duration {
        Duration::from_millis(self.continuous_interval_ms)
    }

    pub fn slow_drain_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_drain_threshold_ms)
    }

    pub fn max_continuous_interval(&self) -> Duration {
        Duration::from_millis(self.max_continuous_interval_ms)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/outcall".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_seconds: 5,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_timezone: "America/New_York".to_string(),
            continuous_interval_ms: 10_000,
            slow_drain_threshold_ms: 5_000,
            continuous_backoff_factor: 1.5,
            max_continuous_interval_ms: 30_000,
            drain_batch_size: 25,
            activity_timeout_seconds: 600,
            reconcile_interval_seconds: 300,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8089/calls".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otlp_endpoint: None,
            prometheus_port: 9090,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            scheduler: SchedulerSettings::default(),
            dispatch: DispatchSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

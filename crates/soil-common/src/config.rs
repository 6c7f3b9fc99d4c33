//! Configuration structures for the dashboard.
//!
//! Supports TOML deserialization with defaults matching the hosted
//! soilmonitoring.me deployment.

use crate::health::HealthThresholds;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level dashboard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Backend endpoints.
    pub api: ApiConfig,

    /// Push connection retry policy.
    pub reconnect: ReconnectConfig,

    /// Poll intervals.
    pub refresh: RefreshConfig,

    /// Health ranges for live readings.
    pub health: HealthThresholds,

    /// Desktop notification and audio cue switches.
    pub notifications: NotificationConfig,

    /// Alert list handling.
    pub alerts: AlertConfig,

    /// Live chart settings.
    pub charts: ChartConfig,

    /// Local status API.
    pub status: StatusConfig,
}

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST base URL, including the `/api` prefix.
    pub base_url: String,

    /// Push endpoint URL.
    pub ws_url: String,

    /// Per-request timeout for REST calls.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://api.soilmonitoring.me:8080/api"),
            ws_url: String::from("ws://api.soilmonitoring.me:8080/ws/sensor-data"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Push connection retry policy.
///
/// Delays grow geometrically from `initial_delay` by `multiplier`, capped at
/// `max_delay`. `max_attempts = 0` retries forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays (values below 1 act as 1).
    pub multiplier: f64,

    /// Consecutive failed retries before giving up (0 = unbounded).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay, unbounded retries.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.initial_delay);
        }
        Duration::from_secs_f64(secs)
    }

    /// Whether retry number `attempt` (1-based) is beyond the budget.
    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// Poll intervals per dashboard profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Administrator dashboard poll interval.
    #[serde(with = "humantime_serde")]
    pub admin_interval: Duration,

    /// Farmer dashboard poll interval; push is the primary source there.
    #[serde(with = "humantime_serde")]
    pub user_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            admin_interval: Duration::from_secs(30),
            user_interval: Duration::from_secs(60),
        }
    }
}

/// Best-effort side channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Play an audio cue on pushed alerts.
    pub sound: bool,

    /// Raise desktop notifications when permission is granted.
    pub desktop: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sound: true,
            desktop: true,
        }
    }
}

/// What a poll does to alerts that arrived by push but are missing from the
/// polled snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertReconcilePolicy {
    /// The snapshot wins; pushed alerts not in it are dropped.
    #[default]
    Replace,
    /// Pushed alerts since the previous poll survive until the backend lists them.
    RetainPushed,
}

/// Alert list handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Poll/push reconciliation policy.
    pub reconcile: AlertReconcilePolicy,

    /// Alerts shown in the main panel.
    pub panel_limit: usize,

    /// Alerts shown in the notification dropdown.
    pub dropdown_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            reconcile: AlertReconcilePolicy::Replace,
            panel_limit: 10,
            dropdown_limit: 5,
        }
    }
}

/// Live chart settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Readings kept per field.
    pub window: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self { window: 20 }
    }
}

/// Local status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Serve the status API.
    pub enabled: bool,

    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Enable permissive CORS.
    pub enable_cors: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            enable_cors: true,
        }
    }
}

impl DashboardConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

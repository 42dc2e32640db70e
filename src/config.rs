//! Configuration loading for SurveyLink

use crate::error::{Result, SurveyError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SurveyConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Telemetry socket settings
#[derive(Clone, Debug, Deserialize)]
pub struct TelemetryConfig {
    /// Telemetry endpoint (default: tcp://127.0.0.1:8765)
    #[serde(default = "default_telemetry_url")]
    pub url: String,

    /// Socket connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Read timeout used to keep polling responsive, in milliseconds (default: 50)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay before a reconnect attempt in milliseconds (default: 3000)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Reconnect attempts before giving up (default: 3)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay multiplier applied per attempt (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the reconnect delay in milliseconds (default: 30000)
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
}

/// Sensor REST API settings
#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the sensor API (default: http://127.0.0.1:8000/api)
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Request timeout in milliseconds (default: 5000)
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: default_telemetry_url(),
            connect_timeout_ms: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_ms: default_request_timeout(),
            token: None,
        }
    }
}

// Default value functions
fn default_telemetry_url() -> String {
    "tcp://127.0.0.1:8765".to_string()
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_poll_interval() -> u64 {
    50
}
fn default_reconnect_delay() -> u64 {
    3000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    1.0
}
fn default_max_reconnect_delay() -> u64 {
    30_000
}
fn default_api_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}
fn default_request_timeout() -> u64 {
    5000
}

impl SurveyConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SurveyError::Config(format!("Failed to read config file: {}", e)))?;
        let config: SurveyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the channel cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.backoff_multiplier < 1.0 {
            return Err(SurveyError::Config(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.telemetry.backoff_multiplier
            )));
        }
        if self.telemetry.poll_interval_ms == 0 {
            return Err(SurveyError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl TelemetryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

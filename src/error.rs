//! Error types for SurveyLink

use thiserror::Error;

use crate::measurement::MeasurementError;
use crate::store::ApiError;

/// SurveyLink error type
#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Measurement error: {0}")]
    Measurement(#[from] MeasurementError),

    #[error("Telemetry link lost after {attempts} reconnect attempts")]
    LinkLost { attempts: u32 },
}

impl From<toml::de::Error> for SurveyError {
    fn from(e: toml::de::Error) -> Self {
        SurveyError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for SurveyError {
    fn from(e: serde_json::Error) -> Self {
        SurveyError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;

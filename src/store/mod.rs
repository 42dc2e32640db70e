//! Sensor record store.
//!
//! [`SensorStore`] is the seam to the REST API that persists sensor
//! records per project. Reads treat "not found" as no data: `get` returns
//! `Ok(None)` and `list` an empty vector. Writes to a missing record fail
//! with [`ApiError::NotFound`]. Nothing here retries; each failure is
//! reported once to the caller.

use serde_json::Value;
use thiserror::Error;

use crate::measurement::records::{ProjectId, RecordId, SensorRecord, StoredRecord};
use crate::telemetry::messages::SensorKind;

mod http;
mod memory;

pub use http::HttpSensorStore;
pub use memory::{MemoryStore, StoreCall};

/// REST failure categories
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not found")]
    NotFound,

    #[error("Request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request aborted: {0}")]
    Aborted(String),
}

/// Longest error message kept from a response body
const MAX_MESSAGE_LEN: usize = 200;

impl ApiError {
    /// Classify a non-success HTTP status. Returns `None` for 1xx-3xx.
    pub fn from_status(status: u16, body: &str) -> Option<Self> {
        match status {
            100..=399 => None,
            401 | 403 => Some(ApiError::NotAuthenticated),
            404 => Some(ApiError::NotFound),
            400..=499 => Some(ApiError::Client {
                status,
                message: error_message(body),
            }),
            _ => Some(ApiError::Server {
                status,
                message: error_message(body),
            }),
        }
    }

    /// Transient failures the user may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Server { .. } | ApiError::ConnectionLost(_))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::ConnectionLost(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::InvalidResponse(e.to_string())
    }
}

/// Pull a readable message out of an error body
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    body.trim().chars().take(MAX_MESSAGE_LEN).collect()
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// CRUD access to sensor records, keyed by project and record id
pub trait SensorStore: Send + Sync {
    /// Store a new record and return its id
    fn create(&self, project: ProjectId, record: &SensorRecord) -> ApiResult<RecordId>;

    /// Fetch one record; `None` if it does not exist
    fn get(
        &self,
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    ) -> ApiResult<Option<StoredRecord>>;

    /// All records of one sensor for a project; empty if there are none
    fn list(&self, project: ProjectId, kind: SensorKind) -> ApiResult<Vec<StoredRecord>>;

    /// Send a second reading for an existing record
    fn update(&self, project: ProjectId, id: RecordId, record: &SensorRecord) -> ApiResult<()>;

    fn delete(&self, project: ProjectId, kind: SensorKind, id: RecordId) -> ApiResult<()>;
}

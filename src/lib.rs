//! SurveyLink - sensor telemetry and dual measurements for land surveys
//!
//! Connects to the sensor head (IMX477 camera, TF-Luna lidar, MPU6050 IMU)
//! over a reconnecting telemetry channel, and sequences the two-step
//! "dual" measurement against the survey REST API.

pub mod config;
pub mod error;
pub mod measurement;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use config::SurveyConfig;
pub use error::{Result, SurveyError};

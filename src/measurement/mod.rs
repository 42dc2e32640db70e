//! Survey measurements: records, capture, and the dual-measurement workflow

pub mod capture;
pub mod records;
pub mod session;

pub use capture::MeasurementCapture;
pub use records::{MeasurementSet, ProjectId, RecordId, RecordIds, SensorRecord, StoredRecord};
pub use session::{
    DualMeasurement, MeasurementBook, MeasurementError, MeasurementPhase, SensorFailure,
};

//! Dual-measurement sessions.
//!
//! A span is measured twice with the device flipped in between. The first
//! step creates one record per sensor; the second step updates those same
//! records so the backend can merge the two readings.
//!
//! ```text
//! Initial --(3 creates ok)--> FirstDone(ids) --(3 updates ok)--> DualDone
//! ```
//!
//! The three writes of a step run concurrently and are all joined before
//! the session decides anything. A step with any failed write leaves the
//! phase untouched; writes that did succeed are not rolled back.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::records::{MeasurementSet, ProjectId, RecordId, RecordIds};
use crate::store::{ApiError, ApiResult, SensorStore};
use crate::telemetry::messages::SensorKind;

/// Progress of a dual measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementPhase {
    #[default]
    Initial,
    FirstDone,
    DualDone,
}

impl fmt::Display for MeasurementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeasurementPhase::Initial => "initial",
            MeasurementPhase::FirstDone => "first measurement saved",
            MeasurementPhase::DualDone => "dual measurement complete",
        })
    }
}

/// One failed sensor write
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFailure {
    pub sensor: SensorKind,
    pub error: ApiError,
}

impl fmt::Display for SensorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sensor, self.error)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("Dual measurement for project {project_id} is already complete")]
    AlreadyCompleted { project_id: ProjectId },

    #[error("Saving failed while {phase}: {}", summarize(.failures))]
    WriteFailed {
        phase: MeasurementPhase,
        failures: Vec<SensorFailure>,
    },
}

impl MeasurementError {
    /// True if every failure is one the user can simply retry
    pub fn is_retryable(&self) -> bool {
        match self {
            MeasurementError::AlreadyCompleted { .. } => false,
            MeasurementError::WriteFailed { failures, .. } => {
                failures.iter().all(|f| f.error.is_retryable())
            }
        }
    }
}

fn summarize(failures: &[SensorFailure]) -> String {
    failures
        .iter()
        .map(SensorFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run one store operation per sensor on scoped threads and join them all
fn for_each_sensor<T, F>(op: F) -> Vec<(SensorKind, ApiResult<T>)>
where
    T: Send,
    F: Fn(SensorKind) -> ApiResult<T> + Sync,
{
    let op = &op;
    std::thread::scope(|scope| {
        let handles: Vec<_> = SensorKind::ALL
            .iter()
            .map(|&kind| (kind, scope.spawn(move || op(kind))))
            .collect();

        handles
            .into_iter()
            .map(|(kind, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(ApiError::Aborted(format!("{} write panicked", kind)))
                });
                (kind, result)
            })
            .collect()
    })
}

/// Split joined results into successes, or every failure if there was one
fn collect_results<T>(
    results: Vec<(SensorKind, ApiResult<T>)>,
) -> Result<Vec<(SensorKind, T)>, Vec<SensorFailure>> {
    let mut ok = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (sensor, result) in results {
        match result {
            Ok(value) => ok.push((sensor, value)),
            Err(error) => failures.push(SensorFailure { sensor, error }),
        }
    }
    if failures.is_empty() {
        Ok(ok)
    } else {
        Err(failures)
    }
}

/// Session progress; record ids only exist once the first step succeeded
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Initial,
    FirstDone(RecordIds),
    DualDone(RecordIds),
}

/// Dual-measurement state for one project
#[derive(Debug, Clone)]
pub struct DualMeasurement {
    project_id: ProjectId,
    stage: Stage,
}

impl DualMeasurement {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            stage: Stage::Initial,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn phase(&self) -> MeasurementPhase {
        match self.stage {
            Stage::Initial => MeasurementPhase::Initial,
            Stage::FirstDone(_) => MeasurementPhase::FirstDone,
            Stage::DualDone(_) => MeasurementPhase::DualDone,
        }
    }

    /// Record ids captured by the first step
    pub fn record_ids(&self) -> Option<RecordIds> {
        match self.stage {
            Stage::Initial => None,
            Stage::FirstDone(ids) | Stage::DualDone(ids) => Some(ids),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::DualDone(_))
    }

    /// Save one reading set and advance on success.
    ///
    /// In `Initial` this creates three records; in `FirstDone` it updates
    /// the records created earlier. In `DualDone` it fails without
    /// touching the store.
    pub fn save<S>(
        &mut self,
        store: &S,
        set: &MeasurementSet,
    ) -> Result<MeasurementPhase, MeasurementError>
    where
        S: SensorStore + ?Sized,
    {
        let project = self.project_id;

        match self.stage {
            Stage::Initial => {
                let results = for_each_sensor(|kind| store.create(project, &set.record(kind)));
                let ids = collect_results(results)
                    .and_then(|created| ids_from(&created))
                    .map_err(|failures| self.failed(failures))?;
                self.stage = Stage::FirstDone(ids);
            }
            Stage::FirstDone(ids) => {
                let results = for_each_sensor(|kind| {
                    store.update(project, ids.get(kind), &set.record(kind))
                });
                collect_results(results).map_err(|failures| self.failed(failures))?;
                self.stage = Stage::DualDone(ids);
            }
            Stage::DualDone(_) => {
                tracing::warn!(
                    "Project {}: dual measurement already complete, save rejected",
                    project
                );
                return Err(MeasurementError::AlreadyCompleted {
                    project_id: project,
                });
            }
        }

        let phase = self.phase();
        tracing::info!("Project {}: {}", project, phase);
        Ok(phase)
    }

    fn failed(&self, failures: Vec<SensorFailure>) -> MeasurementError {
        let phase = self.phase();
        for f in &failures {
            tracing::warn!(
                "Project {}: {} write failed while {}: {}",
                self.project_id,
                f.sensor,
                phase,
                f.error
            );
        }
        MeasurementError::WriteFailed { phase, failures }
    }
}

/// Ids for all three sensors, or a failure for each sensor that has none
fn ids_from(created: &[(SensorKind, RecordId)]) -> Result<RecordIds, Vec<SensorFailure>> {
    let find = |kind: SensorKind| {
        created
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
    };
    match (
        find(SensorKind::Imx477),
        find(SensorKind::TfLuna),
        find(SensorKind::Mpu6050),
    ) {
        (Some(imx477), Some(tf_luna), Some(mpu6050)) => Ok(RecordIds {
            imx477,
            tf_luna,
            mpu6050,
        }),
        _ => Err(SensorKind::ALL
            .iter()
            .filter(|&&kind| find(kind).is_none())
            .map(|&sensor| SensorFailure {
                sensor,
                error: ApiError::InvalidResponse("no record id returned".into()),
            })
            .collect()),
    }
}

/// Dual-measurement sessions keyed by project
#[derive(Debug, Default)]
pub struct MeasurementBook {
    sessions: HashMap<ProjectId, DualMeasurement>,
}

impl MeasurementBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `project`, starting a fresh one if none exists
    pub fn session(&mut self, project: ProjectId) -> &mut DualMeasurement {
        self.sessions
            .entry(project)
            .or_insert_with(|| DualMeasurement::new(project))
    }

    pub fn phase(&self, project: ProjectId) -> MeasurementPhase {
        self.sessions
            .get(&project)
            .map(DualMeasurement::phase)
            .unwrap_or_default()
    }

    pub fn save<S>(
        &mut self,
        project: ProjectId,
        store: &S,
        set: &MeasurementSet,
    ) -> Result<MeasurementPhase, MeasurementError>
    where
        S: SensorStore + ?Sized,
    {
        self.session(project).save(store, set)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

//! In-memory sensor store
//!
//! Behaves like the REST API: updates merge the second reading into the
//! stored record, and failures can be queued per sensor to exercise error
//! paths. Every call is logged for inspection.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use super::{ApiError, ApiResult, SensorStore};
use crate::measurement::records::{ProjectId, RecordId, SensorRecord, StoredRecord};
use crate::telemetry::messages::SensorKind;

/// A store operation as seen by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Create {
        project: ProjectId,
        kind: SensorKind,
    },
    Get {
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    },
    List {
        project: ProjectId,
        kind: SensorKind,
    },
    Update {
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    },
    Delete {
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    records: BTreeMap<(SensorKind, RecordId), StoredRecord>,
    failures: HashMap<SensorKind, VecDeque<ApiError>>,
    calls: Vec<StoreCall>,
}

impl Inner {
    fn take_failure(&mut self, kind: SensorKind) -> ApiResult<()> {
        match self.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call touching `kind` fail with `error`
    pub fn fail_next(&self, kind: SensorKind, error: ApiError) {
        self.inner
            .lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SensorStore for MemoryStore {
    fn create(&self, project: ProjectId, record: &SensorRecord) -> ApiResult<RecordId> {
        let kind = record.kind();
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Create { project, kind });
        inner.take_failure(kind)?;

        inner.next_id += 1;
        let id = RecordId(inner.next_id);
        inner.records.insert(
            (kind, id),
            StoredRecord {
                id,
                project_id: project,
                record: record.clone(),
            },
        );
        tracing::debug!("Created {} record {} for project {}", kind, id, project);
        Ok(id)
    }

    fn get(
        &self,
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    ) -> ApiResult<Option<StoredRecord>> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Get { project, kind, id });
        inner.take_failure(kind)?;

        Ok(inner
            .records
            .get(&(kind, id))
            .filter(|r| r.project_id == project)
            .cloned())
    }

    fn list(&self, project: ProjectId, kind: SensorKind) -> ApiResult<Vec<StoredRecord>> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::List { project, kind });
        inner.take_failure(kind)?;

        Ok(inner
            .records
            .values()
            .filter(|r| r.project_id == project && r.record.kind() == kind)
            .cloned()
            .collect())
    }

    fn update(&self, project: ProjectId, id: RecordId, record: &SensorRecord) -> ApiResult<()> {
        let kind = record.kind();
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Update { project, kind, id });
        inner.take_failure(kind)?;

        let stored = inner
            .records
            .get_mut(&(kind, id))
            .filter(|r| r.project_id == project)
            .ok_or(ApiError::NotFound)?;
        stored.record = stored
            .record
            .merged_with(record)
            .ok_or_else(|| ApiError::Client {
                status: 400,
                message: format!("record {} is not a {} record", id, kind),
            })?;
        Ok(())
    }

    fn delete(&self, project: ProjectId, kind: SensorKind, id: RecordId) -> ApiResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Delete { project, kind, id });
        inner.take_failure(kind)?;

        let owned = inner
            .records
            .get(&(kind, id))
            .is_some_and(|r| r.project_id == project);
        if !owned {
            return Err(ApiError::NotFound);
        }
        inner.records.remove(&(kind, id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::messages::DistanceReading;

    fn reading(m: f64) -> SensorRecord {
        SensorRecord::Distance(DistanceReading {
            distance_m: m,
            signal_strength: 2000,
            temperature_c: 24.0,
        })
    }

    #[test]
    fn test_create_get_list() {
        let store = MemoryStore::new();
        let id = store.create(42, &reading(1.0)).unwrap();

        let stored = store.get(42, SensorKind::TfLuna, id).unwrap().unwrap();
        assert_eq!(stored.record, reading(1.0));
        assert_eq!(stored.project_id, 42);

        assert_eq!(store.list(42, SensorKind::TfLuna).unwrap().len(), 1);
        assert!(store.list(42, SensorKind::Imx477).unwrap().is_empty());
        assert!(store.list(7, SensorKind::TfLuna).unwrap().is_empty());
    }

    #[test]
    fn test_missing_reads_are_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.get(1, SensorKind::TfLuna, RecordId(99)).unwrap(), None);
        assert!(store.list(1, SensorKind::Mpu6050).unwrap().is_empty());
    }

    #[test]
    fn test_update_merges() {
        let store = MemoryStore::new();
        let id = store.create(42, &reading(1.2)).unwrap();
        store.update(42, id, &reading(0.8)).unwrap();

        let stored = store.get(42, SensorKind::TfLuna, id).unwrap().unwrap();
        let SensorRecord::Distance(d) = stored.record else {
            panic!("expected distance record");
        };
        assert!((d.distance_m - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_other_project_not_found() {
        let store = MemoryStore::new();
        let id = store.create(42, &reading(1.2)).unwrap();
        assert_eq!(store.update(7, id, &reading(0.8)), Err(ApiError::NotFound));
        assert_eq!(
            store.delete(7, SensorKind::TfLuna, id),
            Err(ApiError::NotFound)
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_queued_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(SensorKind::TfLuna, ApiError::NotAuthenticated);

        assert_eq!(
            store.create(42, &reading(1.0)),
            Err(ApiError::NotAuthenticated)
        );
        assert!(store.create(42, &reading(1.0)).is_ok());
        assert_eq!(store.calls().len(), 2);
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        let id = store.create(42, &reading(1.0)).unwrap();
        store.delete(42, SensorKind::TfLuna, id).unwrap();
        assert!(store.is_empty());
    }
}

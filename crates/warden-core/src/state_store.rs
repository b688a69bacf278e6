//! In-memory [`StateStore`].
//!
//! Used by the replay runner and the test suites. Every accepted write is
//! counted and every status change is kept in a history log, so callers
//! can assert on the exact sequence of transitions an incident went
//! through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;
use warden_proto::{
    IncidentRecord, IncidentStatus, Precondition, RecordPatch, StateStore, StoreError,
};

/// One accepted status write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub id: String,
    /// `None` for an insert.
    pub from: Option<IncidentStatus>,
    pub to: IncidentStatus,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, IncidentRecord>,
    writes: usize,
    history: Vec<StatusChange>,
    failing_writes: usize,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places a record directly, bypassing write accounting.
    pub fn seed(&self, record: IncidentRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Reads a record synchronously.
    pub fn snapshot(&self, id: &str) -> Option<IncidentRecord> {
        self.lock().records.get(id).cloned()
    }

    /// All records, sorted by id.
    pub fn records(&self) -> Vec<IncidentRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of accepted writes (inserts and conditional updates).
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Every accepted status write, in order.
    pub fn history(&self) -> Vec<StatusChange> {
        self.lock().history.clone()
    }

    /// Status writes for one incident, in order.
    pub fn history_for(&self, id: &str) -> Vec<StatusChange> {
        self.lock()
            .history
            .iter()
            .filter(|change| change.id == id)
            .cloned()
            .collect()
    }

    /// Makes the next `n` writes fail with a backend error.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failing_writes = n;
    }

    fn take_injected_failure(inner: &mut Inner) -> Result<(), StoreError> {
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn put_if_absent(&self, record: IncidentRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::take_injected_failure(&mut inner)?;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists { id: record.id });
        }
        inner.writes += 1;
        inner.history.push(StatusChange {
            id: record.id.clone(),
            from: None,
            to: record.status,
        });
        trace!(incident_id = %record.id, status = %record.status, "insert");
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: &Precondition,
        patch: RecordPatch,
    ) -> Result<IncidentRecord, StoreError> {
        let mut inner = self.lock();
        Self::take_injected_failure(&mut inner)?;
        let Some(current) = inner.records.get(id).cloned() else {
            return Err(StoreError::PreconditionFailed {
                id: id.to_string(),
                expected: expected.status,
            });
        };
        if !expected.matches(&current) {
            return Err(StoreError::PreconditionFailed {
                id: id.to_string(),
                expected: expected.status,
            });
        }

        let mut updated = current;
        let from = updated.status;
        patch.apply(&mut updated);

        inner.writes += 1;
        inner.history.push(StatusChange {
            id: id.to_string(),
            from: Some(from),
            to: updated.status,
        });
        trace!(incident_id = %id, from = %from, to = %updated.status, "conditional update");
        inner.records.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn scan(
        &self,
        status: IncidentStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        let mut matching: Vec<_> = self
            .lock()
            .records
            .values()
            .filter(|record| record.status == status && record.updated_at < cutoff)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

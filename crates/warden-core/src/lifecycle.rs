//! Conditional-write helpers shared by every stage.
//!
//! All status writes go through [`Lifecycle::transition`]: it checks the
//! edge against the state machine, caps the error reason, and turns a
//! failed precondition into [`Transition::Lost`]. A lost race means another
//! worker owns the incident; callers stop and never retry the same write.

use crate::clock::Clock;
use crate::text::truncate_bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use warden_proto::{
    ErrorCategory, IncidentRecord, IncidentStatus, Precondition, RecordPatch, StageId, StateStore,
    StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The write was applied; carries the record as stored.
    Won(IncidentRecord),
    /// The stored record no longer matched the precondition.
    Lost,
}

impl Transition {
    pub fn is_won(&self) -> bool {
        matches!(self, Transition::Won(_))
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    error_reason_max_bytes: usize,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, error_reason_max_bytes: usize) -> Self {
        Self {
            store,
            clock,
            error_reason_max_bytes,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A patch stamped with the current time.
    pub fn patch(&self) -> RecordPatch {
        RecordPatch::new(self.now())
    }

    pub async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, LifecycleError> {
        Ok(self.store.get(id).await?)
    }

    /// Inserts a fresh `RECEIVED` record. Returns `None` if the id already exists.
    pub async fn create(
        &self,
        id: &str,
        owner: StageId,
    ) -> Result<Option<IncidentRecord>, LifecycleError> {
        let record = IncidentRecord::received(id, owner, self.now());
        match self.store.put_if_absent(record.clone()).await {
            Ok(()) => {
                info!(incident_id = id, status = %record.status, "Incident created");
                Ok(Some(record))
            }
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(incident_id = id, "Incident already exists");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Inserts a record directly in `FAILED`, for events that never became a
    /// real incident.
    pub async fn insert_failed(
        &self,
        id: &str,
        owner: StageId,
        category: ErrorCategory,
        reason: &str,
    ) -> Result<Option<IncidentRecord>, LifecycleError> {
        let mut record = IncidentRecord::received(id, owner, self.now());
        record.status = IncidentStatus::Failed;
        record.error_category = Some(category);
        record.error_reason = Some(truncate_bytes(reason, self.error_reason_max_bytes).to_string());
        match self.store.put_if_absent(record.clone()).await {
            Ok(()) => {
                info!(incident_id = id, category = %category, "Incident recorded as failed");
                Ok(Some(record))
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies `patch` if the stored record still matches `expected`.
    pub async fn transition(
        &self,
        id: &str,
        expected: Precondition,
        mut patch: RecordPatch,
    ) -> Result<Transition, LifecycleError> {
        let from = expected.status;
        let to = patch.status.unwrap_or(from);
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        if let Some((_, reason)) = patch.error.as_mut() {
            let capped = truncate_bytes(reason, self.error_reason_max_bytes).len();
            reason.truncate(capped);
        }

        match self.store.conditional_update(id, &expected, patch).await {
            Ok(record) => {
                if from != to {
                    info!(incident_id = id, from = %from, to = %to, owner = %record.owner_stage, "Status transition");
                }
                Ok(Transition::Won(record))
            }
            Err(e) if e.is_precondition_failed() => {
                info!(incident_id = id, expected = %from, target = %to, "Lost conditional write, another worker owns this incident");
                Ok(Transition::Lost)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refreshes `updated_at` on a record that is still in `status`.
    pub async fn touch(
        &self,
        id: &str,
        status: IncidentStatus,
    ) -> Result<Transition, LifecycleError> {
        self.transition(id, Precondition::status(status), self.patch())
            .await
    }
}

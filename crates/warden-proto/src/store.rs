//! The state store contract.
//!
//! The store is the only coordination primitive: every status write is a
//! conditional update against a caller-supplied precondition.

use crate::{IncidentRecord, IncidentStatus, Precondition, RecordPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// All errors that can be returned by a [`StateStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stored record does not satisfy the precondition (or is absent).
    /// Another writer got there first.
    #[error("precondition failed for incident {id}: expected {expected}")]
    PreconditionFailed { id: String, expected: IncidentStatus },

    /// Insert-if-absent found an existing record.
    #[error("incident already exists: {id}")]
    AlreadyExists { id: String },

    /// A backend-specific error (connection, serialization, etc.).
    #[error("state store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true when the write lost a race rather than failing.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            StoreError::PreconditionFailed { .. } | StoreError::AlreadyExists { .. }
        )
    }
}

/// Key-value store keyed by incident id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a record.
    async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError>;

    /// Inserts a record, failing with [`StoreError::AlreadyExists`] if the id is taken.
    async fn put_if_absent(&self, record: IncidentRecord) -> Result<(), StoreError>;

    /// Applies `patch` only if the stored record satisfies `expected`.
    ///
    /// Returns the record as written. On [`StoreError::PreconditionFailed`]
    /// the stored record is untouched.
    async fn conditional_update(
        &self,
        id: &str,
        expected: &Precondition,
        patch: RecordPatch,
    ) -> Result<IncidentRecord, StoreError>;

    /// Lists records in `status` whose `updated_at` is strictly before `cutoff`.
    async fn scan(
        &self,
        status: IncidentStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IncidentRecord>, StoreError>;
}

//! The incident record and its lifecycle states.

use crate::{Diagnosis, ErrorCategory, RemediationProposal, StageId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an incident.
///
/// ```text
/// RECEIVED -> INVESTIGATING -> DIAGNOSED -> RESOLVING -> PROPOSED
///                 |    ^                      |    ^
///                 |    '-- stale reset        |    '-- watchdog retry
///                 v                           v    |
///               FAILED <---------------- PROPOSAL_FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Received,
    Investigating,
    #[serde(alias = "CONTEXT_GATHERED")]
    Diagnosed,
    Resolving,
    Proposed,
    ProposalFailed,
    Failed,
}

impl IncidentStatus {
    pub const ALL: [IncidentStatus; 7] = [
        IncidentStatus::Received,
        IncidentStatus::Investigating,
        IncidentStatus::Diagnosed,
        IncidentStatus::Resolving,
        IncidentStatus::Proposed,
        IncidentStatus::ProposalFailed,
        IncidentStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Received => "RECEIVED",
            IncidentStatus::Investigating => "INVESTIGATING",
            IncidentStatus::Diagnosed => "DIAGNOSED",
            IncidentStatus::Resolving => "RESOLVING",
            IncidentStatus::Proposed => "PROPOSED",
            IncidentStatus::ProposalFailed => "PROPOSAL_FAILED",
            IncidentStatus::Failed => "FAILED",
        }
    }

    /// Returns true for `PROPOSED` and `FAILED`.
    pub fn is_terminal(self) -> bool {
        matches!(self, IncidentStatus::Proposed | IncidentStatus::Failed)
    }

    /// Returns true if `self -> next` is an edge of the lifecycle graph.
    ///
    /// A same-state write is allowed: it is how a long-running stage
    /// refreshes `updated_at` without changing status.
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        use IncidentStatus::{
            Diagnosed, Failed, Investigating, ProposalFailed, Proposed, Received, Resolving,
        };
        if self == next {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Received, Investigating)
                | (Investigating, Diagnosed | Failed | Received)
                | (Diagnosed, Resolving)
                | (Resolving, Proposed | ProposalFailed | Failed)
                | (ProposalFailed, Resolving | Failed)
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incident as stored in the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub status: IncidentStatus,
    pub owner_stage: StageId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<RemediationProposal>,
}

impl IncidentRecord {
    /// Creates a fresh `RECEIVED` record.
    pub fn received(id: impl Into<String>, owner: StageId, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: IncidentStatus::Received,
            owner_stage: owner,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            error_reason: None,
            error_category: None,
            diagnosis: None,
            proposal: None,
        }
    }

    /// Time since the last write.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}

/// The precondition of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub status: IncidentStatus,
    pub owner_stage: Option<StageId>,
}

impl Precondition {
    /// Requires the stored status to equal `status`.
    pub fn status(status: IncidentStatus) -> Self {
        Self {
            status,
            owner_stage: None,
        }
    }

    /// Additionally requires the stored owner to equal `owner`.
    #[must_use]
    pub fn owned_by(mut self, owner: StageId) -> Self {
        self.owner_stage = Some(owner);
        self
    }

    pub fn matches(&self, record: &IncidentRecord) -> bool {
        record.status == self.status
            && self
                .owner_stage
                .as_ref()
                .is_none_or(|owner| *owner == record.owner_stage)
    }
}

/// Fields to write on a successful conditional update.
///
/// `updated_at` is always written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub updated_at: DateTime<Utc>,
    pub status: Option<IncidentStatus>,
    pub owner_stage: Option<StageId>,
    pub retry_count: Option<u32>,
    pub error: Option<(ErrorCategory, String)>,
    pub diagnosis: Option<Diagnosis>,
    pub proposal: Option<RemediationProposal>,
}

impl RecordPatch {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            status: None,
            owner_stage: None,
            retry_count: None,
            error: None,
            diagnosis: None,
            proposal: None,
        }
    }

    #[must_use]
    pub fn status(mut self, status: IncidentStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: StageId) -> Self {
        self.owner_stage = Some(owner);
        self
    }

    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    #[must_use]
    pub fn error(mut self, category: ErrorCategory, reason: impl Into<String>) -> Self {
        self.error = Some((category, reason.into()));
        self
    }

    #[must_use]
    pub fn diagnosis(mut self, diagnosis: Diagnosis) -> Self {
        self.diagnosis = Some(diagnosis);
        self
    }

    #[must_use]
    pub fn proposal(mut self, proposal: RemediationProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    /// Writes the patch onto a record.
    pub fn apply(self, record: &mut IncidentRecord) {
        record.updated_at = self.updated_at;
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(owner) = self.owner_stage {
            record.owner_stage = owner;
        }
        if let Some(retry_count) = self.retry_count {
            record.retry_count = retry_count;
        }
        if let Some((category, reason)) = self.error {
            record.error_category = Some(category);
            record.error_reason = Some(reason);
        }
        if let Some(diagnosis) = self.diagnosis {
            record.diagnosis = Some(diagnosis);
        }
        if let Some(proposal) = self.proposal {
            record.proposal = Some(proposal);
        }
    }
}

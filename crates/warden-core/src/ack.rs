//! Acknowledgment returned to the caller of a stage.
//!
//! Stages never surface processing failures as errors: the outcome is
//! recorded on the incident and summarized here, so the bus only ever
//! redelivers on delivery problems.

use serde::{Serialize, Serializer};
use std::time::Duration;
use warden_proto::{ErrorCategory, IncidentStatus};

fn durations_as_millis<S: Serializer>(durations: &[Duration], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(durations.iter().map(|d| d.as_millis() as u64))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageAck {
    pub incident_id: String,
    /// Last status this invocation wrote, or the status found when it
    /// wrote nothing.
    pub status: Option<IncidentStatus>,
    pub already_handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub handoff_failed: bool,
    /// Reasoning attempts made, including the first.
    pub attempts: u32,
    #[serde(rename = "backoff_ms", serialize_with = "durations_as_millis")]
    pub backoffs: Vec<Duration>,
}

impl StageAck {
    pub fn new(incident_id: impl Into<String>, status: IncidentStatus) -> Self {
        Self {
            incident_id: incident_id.into(),
            status: Some(status),
            already_handled: false,
            error_category: None,
            detail: None,
            handoff_failed: false,
            attempts: 0,
            backoffs: Vec::new(),
        }
    }

    /// Someone else owns the incident; nothing was written.
    pub fn already_handled(incident_id: impl Into<String>, status: Option<IncidentStatus>) -> Self {
        Self {
            status,
            already_handled: true,
            ..Self::new(incident_id, IncidentStatus::Received)
        }
    }

    /// The stage could not complete for a reason outside the incident's lifecycle.
    pub fn aborted(incident_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: Some(detail.into()),
            ..Self::new(incident_id, IncidentStatus::Received)
        }
    }

    #[must_use]
    pub fn with_error(mut self, category: ErrorCategory) -> Self {
        self.error_category = Some(category);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32, backoffs: Vec<Duration>) -> Self {
        self.attempts = attempts;
        self.backoffs = backoffs;
        self
    }

    pub fn is_success(&self) -> bool {
        !self.already_handled
            && self.error_category.is_none()
            && matches!(
                self.status,
                Some(IncidentStatus::Resolving | IncidentStatus::Proposed)
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_backoffs_in_millis() {
        let ack = StageAck::new("X#T1", IncidentStatus::Resolving)
            .with_attempts(2, vec![Duration::from_secs(1)]);
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["backoff_ms"], json!([1000]));
        assert_eq!(value["status"], "RESOLVING");
        assert!(value.get("error_category").is_none());
        assert!(ack.is_success());
    }

    #[test]
    fn test_already_handled_keeps_found_status() {
        let ack = StageAck::already_handled("X#T1", Some(IncidentStatus::Proposed));
        assert!(ack.already_handled);
        assert_eq!(ack.status, Some(IncidentStatus::Proposed));
        assert!(!ack.is_success());
    }
}

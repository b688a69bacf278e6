//! Test doubles and the scenario replay runner.
//!
//! Used by this crate's tests, the integration suites, and `warden replay`.

mod scenario;
mod scripted;

pub use scenario::{
    FailureKind, FixtureCall, FixtureFailure, Scenario, ScenarioError, ScenarioResult,
    ScenarioRunner, ScriptedTurn, WatchdogPlan,
};
pub use scripted::{ManualClock, ScriptStep, ScriptedReasoner, StaticToolProvider};

use serde_json::{Map, json};
use warden_proto::{ApiCall, Diagnosis, EvidencePointer, RemediationProposal, RemediationStep};

/// A complete permission-loss diagnosis.
pub fn sample_diagnosis() -> Diagnosis {
    Diagnosis {
        root_cause: "Inline policy granting s3:GetObject was removed from the execution role"
            .to_string(),
        fault_types: vec!["permission_loss".to_string()],
        affected_resources: vec!["X".to_string(), "X-role".to_string()],
        severity: "high".to_string(),
        evidence: vec![EvidencePointer {
            tool: "get_recent_logs".to_string(),
            field: "events[0].message".to_string(),
            value: "AccessDenied".to_string(),
            interpretation: "The function lost read access to its bucket".to_string(),
        }],
        remediation_plan: vec![RemediationStep {
            action: "restore_policy".to_string(),
            details: "Re-attach the baseline inline policy".to_string(),
            evidence_basis: vec![0],
            risk_level: "low".to_string(),
            requires_approval: true,
        }],
    }
}

/// A one-action proposal answering [`sample_diagnosis`].
pub fn sample_proposal(incident_id: &str) -> RemediationProposal {
    let mut parameters = Map::new();
    parameters.insert("RoleName".to_string(), json!("X-role"));
    parameters.insert("PolicyName".to_string(), json!("s3-read"));
    RemediationProposal {
        incident_id: incident_id.to_string(),
        fault_types: vec!["permission_loss".to_string()],
        actions: vec![ApiCall {
            service: "iam".to_string(),
            operation: "put_role_policy".to_string(),
            parameters,
            risk_level: "low".to_string(),
            requires_approval: true,
            reasoning: "Restores the baseline policy".to_string(),
        }],
        reasoning: "The role drifted from its baseline".to_string(),
    }
}

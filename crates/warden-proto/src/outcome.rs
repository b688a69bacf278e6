//! Structured outcomes produced by the reasoning service.
//!
//! Each outcome is submitted through a dedicated pseudo-tool and parsed
//! from that call's arguments.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A terminal result that the reasoning loop can accept.
pub trait StructuredOutcome:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Name of the pseudo-tool used to submit this outcome.
    const SUBMIT_TOOL: &'static str;

    /// What the outcome is called in directives ("diagnosis", "proposal").
    const NOUN: &'static str;

    /// Description shown to the reasoning service for the submit tool.
    const SUBMIT_DESCRIPTION: &'static str;
}

/// Points a claim at a specific field of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePointer {
    pub tool: String,
    pub field: String,
    pub value: String,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationStep {
    pub action: String,
    pub details: String,
    /// Indices into [`Diagnosis::evidence`].
    pub evidence_basis: Vec<usize>,
    pub risk_level: String,
    pub requires_approval: bool,
}

/// Output of the Intake stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: String,
    pub fault_types: Vec<String>,
    pub affected_resources: Vec<String>,
    pub severity: String,
    pub evidence: Vec<EvidencePointer>,
    pub remediation_plan: Vec<RemediationStep>,
}

impl StructuredOutcome for Diagnosis {
    const SUBMIT_TOOL: &'static str = "submit_diagnosis";
    const NOUN: &'static str = "diagnosis";
    const SUBMIT_DESCRIPTION: &'static str =
        "Submit your final diagnosis when you have enough evidence.";
}

/// One concrete API call proposed as remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub service: String,
    pub operation: String,
    pub parameters: Map<String, Value>,
    pub risk_level: String,
    pub requires_approval: bool,
    pub reasoning: String,
}

/// Output of the Resolution stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationProposal {
    pub incident_id: String,
    pub fault_types: Vec<String>,
    pub actions: Vec<ApiCall>,
    pub reasoning: String,
}

impl StructuredOutcome for RemediationProposal {
    const SUBMIT_TOOL: &'static str = "submit_proposal";
    const NOUN: &'static str = "proposal";
    const SUBMIT_DESCRIPTION: &'static str =
        "Submit your remediation proposal with exact API calls to fix the incident.";
}

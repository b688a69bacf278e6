//! Prompt text for the two reasoning stages and the loop directives.

use warden_proto::{Diagnosis, StructuredOutcome};

pub const DIAGNOSIS_SYSTEM_PROMPT: &str = "\
You are an incident response diagnostician. You investigate workload failures by \
querying live infrastructure through diagnostic tools.

RULES:
1. ONLY use data returned by your tools. Never fabricate information.
2. Reason step-by-step about the likely cause before choosing tools.
3. Choose tools based on the error type. Do not call tools unnecessarily.
4. After gathering enough evidence, call submit_diagnosis with your findings.
5. If a tool returns an error or unexpected data, report it honestly.
6. Report ALL detected faults in fault_types.

TOOL SELECTION GUIDANCE:
- Access/permission errors: get_iam_state first, then logs
- Throttling errors: get_lambda_config first, then logs
- Unknown errors: get_recent_logs first for clues

For every claim, provide an evidence pointer (tool, field, observed value, \
interpretation). Each remediation step must reference the evidence indices that \
justify it.";

pub const PROPOSAL_SYSTEM_PROMPT: &str = "\
You are an incident remediation specialist. Given a diagnosis of workload failures, \
you produce concrete, executable remediation proposals with exact API parameters.

RULES:
1. ONLY use data returned by your tools and the diagnosis. Never fabricate information.
2. For each fault type, call the appropriate tool to gather current state.
3. Produce exact API parameters for each remediation action.
4. When ready, call submit_proposal with your complete proposal.

FAULT TYPE TO TOOL MAPPING:
- permission_loss: get_baseline_iam, then restore the expected policy
- throttling: get_current_concurrency, then remove the concurrency limit";

/// First user message for the diagnosis loop.
pub fn diagnosis_input(raw_event: &serde_json::Value) -> String {
    let body = serde_json::to_string_pretty(raw_event).unwrap_or_else(|_| raw_event.to_string());
    format!("Investigate this incident:\n{body}")
}

/// First user message for the proposal loop.
pub fn proposal_input(incident_id: &str, diagnosis: &Diagnosis) -> String {
    let body = serde_json::to_string_pretty(diagnosis).unwrap_or_default();
    format!("Produce a remediation proposal for incident {incident_id}.\nDiagnosis:\n{body}")
}

pub fn deadline_directive<O: StructuredOutcome>() -> String {
    format!(
        "Time is running out. Submit your {} immediately with whatever evidence you have.",
        O::NOUN
    )
}

pub fn budget_directive<O: StructuredOutcome>() -> String {
    format!("Token budget exceeded. Submit your {} immediately.", O::NOUN)
}

pub fn nudge_directive<O: StructuredOutcome>() -> String {
    format!(
        "You have gathered enough information. You MUST now call the {tool} tool with your {noun}. \
         Do not respond with text; call {tool} immediately.",
        tool = O::SUBMIT_TOOL,
        noun = O::NOUN,
    )
}

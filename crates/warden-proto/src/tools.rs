//! Argument and response schemas for the evidence providers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GET_RECENT_LOGS: &str = "get_recent_logs";
pub const GET_IAM_STATE: &str = "get_iam_state";
pub const GET_LAMBDA_CONFIG: &str = "get_lambda_config";
pub const GET_BASELINE_IAM: &str = "get_baseline_iam";
pub const GET_CURRENT_CONCURRENCY: &str = "get_current_concurrency";

/// Canonical body returned when a provider produced nothing.
pub const EMPTY_RESPONSE_ERROR: &str = r#"{"error": "Tool returned empty response"}"#;

/// Canonical body returned for a tool the provider does not know.
pub const UNKNOWN_TOOL_ERROR: &str = r#"{"error": "unknown tool"}"#;

/// Arguments for tools keyed by workload name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaNameArgs {
    pub lambda_name: String,
}

/// Arguments for tools keyed by role name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleNameArgs {
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsResponse {
    pub log_group: String,
    pub events: Vec<LogEvent>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamStateResponse {
    pub role_name: String,
    pub inline_policies: Map<String, Value>,
    pub attached_policies: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LambdaConfigResponse {
    pub function_name: String,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub memory_size: Option<i64>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub reserved_concurrent_executions: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineIamResponse {
    pub role_name: String,
    pub policy_name: String,
    pub expected_policy: Map<String, Value>,
    pub current_policy: Option<Map<String, Value>>,
    pub drift: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyResponse {
    pub lambda_name: String,
    pub reserved_concurrency: Option<i64>,
    pub is_throttled: bool,
}

//! Name-keyed registry of evidence tools.
//!
//! Each entry pairs a tool name with an argument schema and a response
//! schema, both expressed as serde types. Lookup happens by string at call
//! time, so adding a tool never touches the loop driver.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use warden_proto::tools::{
    BaselineIamResponse, ConcurrencyResponse, GET_BASELINE_IAM, GET_CURRENT_CONCURRENCY,
    GET_IAM_STATE, GET_LAMBDA_CONFIG, GET_RECENT_LOGS, IamStateResponse, LambdaConfigResponse,
    LambdaNameArgs, LogsResponse, RoleNameArgs,
};
use warden_proto::{Diagnosis, RemediationProposal, StructuredOutcome, ToolDefinition};

type ArgValidator = fn(&Value) -> Result<Value, String>;
type ResponseValidator = fn(&Value) -> Result<(), String>;

fn check_args<A: DeserializeOwned + Serialize>(args: &Value) -> Result<Value, String> {
    let parsed: A = serde_json::from_value(args.clone()).map_err(|e| e.to_string())?;
    serde_json::to_value(parsed).map_err(|e| e.to_string())
}

fn check_response<R: DeserializeOwned>(data: &Value) -> Result<(), String> {
    R::deserialize(data).map(|_| ()).map_err(|e| e.to_string())
}

/// One registered tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    validate_args: ArgValidator,
    validate_response: Option<ResponseValidator>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// A tool whose arguments parse as `A` and whose response parses as `R`.
    pub fn typed<A, R>(name: impl Into<String>, description: impl Into<String>) -> Self
    where
        A: DeserializeOwned + Serialize,
        R: DeserializeOwned,
    {
        Self {
            name: name.into(),
            description: description.into(),
            validate_args: check_args::<A>,
            validate_response: Some(check_response::<R>),
        }
    }

    /// A tool with typed arguments whose response is accepted as any JSON.
    pub fn untyped_response<A>(name: impl Into<String>, description: impl Into<String>) -> Self
    where
        A: DeserializeOwned + Serialize,
    {
        Self {
            name: name.into(),
            description: description.into(),
            validate_args: check_args::<A>,
            validate_response: None,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Evidence tools plus the submission pseudo-tool for one stage.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
    submit: ToolDefinition,
}

impl ToolRegistry {
    /// An empty registry whose submission tool belongs to `O`.
    pub fn for_outcome<O: StructuredOutcome>() -> Self {
        Self {
            tools: BTreeMap::new(),
            submit: ToolDefinition {
                name: O::SUBMIT_TOOL.to_string(),
                description: O::SUBMIT_DESCRIPTION.to_string(),
            },
        }
    }

    /// Tools available while diagnosing.
    pub fn intake() -> Self {
        Self::for_outcome::<Diagnosis>()
            .register(ToolSpec::typed::<LambdaNameArgs, LogsResponse>(
                GET_RECENT_LOGS,
                "Get recent log events for a workload.",
            ))
            .register(ToolSpec::typed::<LambdaNameArgs, IamStateResponse>(
                GET_IAM_STATE,
                "Get the permission policies attached to a workload's role.",
            ))
            .register(ToolSpec::typed::<LambdaNameArgs, LambdaConfigResponse>(
                GET_LAMBDA_CONFIG,
                "Get a workload's runtime configuration.",
            ))
    }

    /// Tools available while proposing a remediation.
    pub fn resolution() -> Self {
        Self::for_outcome::<RemediationProposal>()
            .register(ToolSpec::typed::<RoleNameArgs, BaselineIamResponse>(
                GET_BASELINE_IAM,
                "Compare a role's current policy against its known-good baseline.",
            ))
            .register(ToolSpec::typed::<LambdaNameArgs, ConcurrencyResponse>(
                GET_CURRENT_CONCURRENCY,
                "Get a workload's reserved concurrency and throttle state.",
            ))
    }

    #[must_use]
    pub fn register(mut self, spec: ToolSpec) -> Self {
        self.tools.insert(spec.name.clone(), spec);
        self
    }

    pub fn submit_tool(&self) -> &str {
        &self.submit.name
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Every tool as advertised to the reasoning service, submission last.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(ToolSpec::definition)
            .chain(std::iter::once(self.submit.clone()))
            .collect()
    }

    /// Validates and normalizes the arguments of a call.
    ///
    /// Errors are phrased for the reasoning service.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<Value, String> {
        let spec = self
            .get(name)
            .ok_or_else(|| format!("Invalid arguments: unknown tool '{name}'"))?;
        (spec.validate_args)(args).map_err(|e| format!("Invalid arguments: {e}"))
    }

    /// Parses a raw tool response and checks it against the tool's schema.
    pub fn validate_response(&self, name: &str, raw: &str) -> Result<Value, String> {
        let data: Value =
            serde_json::from_str(raw).map_err(|e| format!("Invalid JSON response: {e}"))?;
        if let Some(check) = self.get(name).and_then(|spec| spec.validate_response) {
            check(&data).map_err(|e| format!("Response validation failed: {e}"))?;
        }
        Ok(data)
    }
}

//! Replays a YAML incident scenario end to end against in-memory adapters.
//!
//! A scenario names a triggering event, canned tool responses, and the
//! reasoning service's replies for each stage. The runner drives Intake,
//! drains the handoff into Resolution, and optionally runs Watchdog sweeps
//! after advancing the clock.

use super::scripted::{ManualClock, ScriptStep, ScriptedReasoner, StaticToolProvider};
use crate::ack::StageAck;
use crate::archive::InMemoryArchive;
use crate::collaborators::Collaborators;
use crate::config::WardenConfig;
use crate::intake::IntakeStage;
use crate::lifecycle::LifecycleError;
use crate::local_bus::InMemoryMessageBus;
use crate::resolution::ResolutionStage;
use crate::state_store::{InMemoryStateStore, StatusChange};
use crate::watchdog::{Watchdog, WatchdogReport};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use warden_proto::{
    Diagnosis, ErrorCategory, IncidentRecord, IncidentStatus, ReasoningResponse,
    RemediationProposal, ServiceError, StructuredOutcome, TokenUsage, ToolCall,
};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connection,
    Init,
    Api,
    Other,
}

/// A reasoning service failure as written in a fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureFailure {
    pub kind: FailureKind,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl FixtureFailure {
    fn to_service_error(&self) -> ServiceError {
        let message = self.message.clone();
        match self.kind {
            FailureKind::Timeout => ServiceError::Timeout(message),
            FailureKind::Connection => ServiceError::Connection(message),
            FailureKind::Init => ServiceError::Init(message),
            FailureKind::Api => ServiceError::api(self.code.clone().unwrap_or_default(), message),
            FailureKind::Other => ServiceError::Other(message),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One reply of the reasoning service. Exactly one of the fields is
/// expected; `fail` wins over the others.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptedTurn {
    pub text: Option<String>,
    pub tools: Vec<FixtureCall>,
    /// Arguments of the stage's submission tool.
    pub submit: Option<Value>,
    pub fail: Option<FixtureFailure>,
    pub usage: Option<TokenUsage>,
}

impl ScriptedTurn {
    fn to_step(&self, turn: usize, submit_tool: &str) -> ScriptStep {
        if let Some(failure) = &self.fail {
            return ScriptStep::Fail(failure.to_service_error());
        }
        let mut calls: Vec<ToolCall> = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, call)| {
                ToolCall::new(format!("call-{turn}-{i}"), &call.name, call.arguments.clone())
            })
            .collect();
        if let Some(outcome) = &self.submit {
            calls.push(ToolCall::new(
                format!("submit-{turn}"),
                submit_tool,
                outcome.clone(),
            ));
        }
        let response = ReasoningResponse {
            content: self.text.clone().unwrap_or_default(),
            tool_calls: calls,
            usage: self.usage.unwrap_or_default(),
        };
        ScriptStep::Respond(response)
    }
}

fn reasoner_for<O: StructuredOutcome>(turns: &[ScriptedTurn]) -> ScriptedReasoner {
    ScriptedReasoner::from_steps(
        turns
            .iter()
            .enumerate()
            .map(|(turn, t)| t.to_step(turn, O::SUBMIT_TOOL)),
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogPlan {
    /// Clock advance before each sweep.
    pub advance_secs: u64,
    #[serde(default = "default_sweeps")]
    pub sweeps: u32,
}

fn default_sweeps() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Expectation {
    pub status: IncidentStatus,
    #[serde(default)]
    pub error_category: Option<ErrorCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    pub event: Value,
    /// Canned tool bodies. Strings are returned verbatim, anything else as JSON.
    #[serde(default)]
    pub tools: BTreeMap<String, Value>,
    #[serde(default)]
    pub diagnosis: Vec<ScriptedTurn>,
    #[serde(default)]
    pub proposal: Vec<ScriptedTurn>,
    /// Number of bus publishes to reject, starting with the first.
    #[serde(default)]
    pub fail_publishes: usize,
    #[serde(default)]
    pub watchdog: Option<WatchdogPlan>,
    #[serde(default)]
    pub expect: Option<Expectation>,
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> Result<Self, ScenarioError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    fn tool_provider(&self) -> StaticToolProvider {
        self.tools
            .iter()
            .fold(StaticToolProvider::new(), |provider, (name, body)| {
                let body = match body {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                provider.with_response(name.clone(), body)
            })
    }
}

/// Everything a replay observed.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub intake: StageAck,
    pub resolution: Vec<StageAck>,
    pub watchdog: Vec<WatchdogReport>,
    pub record: Option<IncidentRecord>,
    pub history: Vec<StatusChange>,
    pub handoffs_published: usize,
    pub diagnosis_calls: usize,
    pub proposal_calls: usize,
    /// `None` when the scenario states no expectation.
    pub expectation_met: Option<bool>,
}

pub struct ScenarioRunner {
    config: WardenConfig,
}

impl ScenarioRunner {
    pub fn new(config: WardenConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioResult, ScenarioError> {
        info!(scenario = %scenario.name, "Replaying scenario");
        let store = Arc::new(InMemoryStateStore::new());
        let bus = Arc::new(InMemoryMessageBus::new(self.config.topics.handoff.clone()));
        bus.fail_next_publishes(scenario.fail_publishes);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let diagnosis_reasoner = Arc::new(reasoner_for::<Diagnosis>(&scenario.diagnosis));
        let proposal_reasoner = Arc::new(reasoner_for::<RemediationProposal>(&scenario.proposal));

        let collaborators = Collaborators {
            store: store.clone(),
            bus: bus.clone(),
            archive: Arc::new(InMemoryArchive::new()),
            reasoner: diagnosis_reasoner.clone(),
            tools: Arc::new(scenario.tool_provider()),
            clock: clock.clone(),
        };
        let intake = IntakeStage::new(&collaborators, &self.config);
        let resolution = ResolutionStage::new(
            &Collaborators {
                reasoner: proposal_reasoner.clone(),
                ..collaborators.clone()
            },
            &self.config,
        );
        let watchdog = Watchdog::new(&collaborators, &self.config);

        let intake_ack = intake.handle(&scenario.event).await;
        let mut resolution_acks = resolution.drain(&bus).await;

        let mut reports = Vec::new();
        if let Some(plan) = &scenario.watchdog {
            for _ in 0..plan.sweeps {
                clock.advance(Duration::seconds(plan.advance_secs as i64));
                reports.push(watchdog.sweep().await?);
                resolution_acks.extend(resolution.drain(&bus).await);
            }
        }

        let record = store.snapshot(&intake_ack.incident_id);
        let expectation_met = scenario.expect.as_ref().map(|expect| {
            record.as_ref().is_some_and(|record| {
                record.status == expect.status
                    && (expect.error_category.is_none()
                        || record.error_category == expect.error_category)
            })
        });

        Ok(ScenarioResult {
            scenario: scenario.name.clone(),
            history: store.history_for(&intake_ack.incident_id),
            intake: intake_ack,
            resolution: resolution_acks,
            watchdog: reports,
            record,
            handoffs_published: bus.published().len(),
            diagnosis_calls: diagnosis_reasoner.call_count(),
            proposal_calls: proposal_reasoner.call_count(),
            expectation_met,
        })
    }
}

//! Shared harness for the integration suites.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use warden_core::testing::{
    ManualClock, ScriptedReasoner, StaticToolProvider, sample_diagnosis, sample_proposal,
};
use warden_core::{
    Clock, Collaborators, InMemoryArchive, InMemoryMessageBus, InMemoryStateStore, IntakeStage,
    ResolutionStage, WardenConfig, Watchdog,
};
use warden_proto::tools::GET_RECENT_LOGS;
use warden_proto::{
    IncidentRecord, IncidentStatus, ReasoningResponse, ReasoningService, StageId, ToolCall,
};

pub const LOGS: &str = r#"{"log_group": "/aws/lambda/X", "events": [{"timestamp": "T1", "message": "AccessDenied: s3:GetObject"}]}"#;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn trigger(lambda: &str, ts: &str) -> Value {
    json!({"lambda": lambda, "ts": ts, "error_type": "access_denied"})
}

pub fn submit_diagnosis() -> ReasoningResponse {
    ReasoningResponse::calls(vec![ToolCall::new(
        "submit",
        "submit_diagnosis",
        serde_json::to_value(sample_diagnosis()).unwrap(),
    )])
}

pub fn submit_proposal(incident_id: &str) -> ReasoningResponse {
    ReasoningResponse::calls(vec![ToolCall::new(
        "submit",
        "submit_proposal",
        serde_json::to_value(sample_proposal(incident_id)).unwrap(),
    )])
}

pub fn logs_call(lambda: &str) -> ReasoningResponse {
    ReasoningResponse::calls(vec![ToolCall::new(
        "logs",
        GET_RECENT_LOGS,
        json!({"lambda_name": lambda}),
    )])
}

pub struct Harness {
    pub store: Arc<InMemoryStateStore>,
    pub bus: Arc<InMemoryMessageBus>,
    pub archive: Arc<InMemoryArchive>,
    pub clock: Arc<ManualClock>,
    pub tools: Arc<StaticToolProvider>,
    pub config: WardenConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WardenConfig::default())
    }

    pub fn with_config(config: WardenConfig) -> Self {
        Self {
            store: Arc::new(InMemoryStateStore::new()),
            bus: Arc::new(InMemoryMessageBus::new(config.topics.handoff.clone())),
            archive: Arc::new(InMemoryArchive::new()),
            clock: Arc::new(ManualClock::new(start_time())),
            tools: Arc::new(StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS)),
            config,
        }
    }

    pub fn collaborators(&self, reasoner: Arc<dyn ReasoningService>) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            bus: self.bus.clone(),
            archive: self.archive.clone(),
            reasoner,
            tools: self.tools.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn intake(&self, reasoner: &Arc<ScriptedReasoner>) -> IntakeStage {
        IntakeStage::new(&self.collaborators(reasoner.clone()), &self.config)
    }

    pub fn resolution(&self, reasoner: &Arc<ScriptedReasoner>) -> ResolutionStage {
        ResolutionStage::new(&self.collaborators(reasoner.clone()), &self.config)
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(
            &self.collaborators(Arc::new(ScriptedReasoner::new())),
            &self.config,
        )
    }

    /// Places a record whose last write was `age_secs` ago.
    pub fn seed(
        &self,
        id: &str,
        status: IncidentStatus,
        owner: StageId,
        age_secs: i64,
    ) -> IncidentRecord {
        let written = self.clock.now() - Duration::seconds(age_secs);
        let mut record = IncidentRecord::received(id, owner, written);
        record.status = status;
        if matches!(
            status,
            IncidentStatus::Diagnosed
                | IncidentStatus::Resolving
                | IncidentStatus::ProposalFailed
        ) {
            record.diagnosis = Some(sample_diagnosis());
        }
        self.store.seed(record.clone());
        record
    }

    pub fn record(&self, id: &str) -> IncidentRecord {
        self.store.snapshot(id).expect("record should exist")
    }

    /// Asserts that every recorded status change follows a legal edge.
    pub fn assert_legal_history(&self) {
        for change in self.store.history() {
            if let Some(from) = change.from {
                assert!(
                    from.can_transition_to(change.to),
                    "illegal edge {from} -> {} for {}",
                    change.to,
                    change.id
                );
            }
        }
    }
}

//! Stage 1: open an incident, gather evidence, produce a diagnosis.
//!
//! Intake is the only stage that creates records. On every delivery it
//! looks the incident up first:
//!
//! - no record: create it in `RECEIVED` and proceed
//! - `RECEIVED`: a previous worker crashed before claiming it; proceed
//! - `INVESTIGATING` older than the staleness window: reset to `RECEIVED`
//!   and proceed
//! - anything else: already handled, nothing is written
//!
//! A successful diagnosis is stored with the `DIAGNOSED` transition, the
//! record is claimed for resolution, and the handoff is published.

use crate::ack::StageAck;
use crate::archive::{AuditRecord, ContextRecord, EvidenceArchive};
use crate::collaborators::Collaborators;
use crate::config::{IntakeConfig, StorageConfig, WardenConfig};
use crate::lifecycle::{Lifecycle, LifecycleError, Transition};
use crate::prompts::{DIAGNOSIS_SYSTEM_PROMPT, diagnosis_input};
use crate::reasoning_loop::{LoopResult, LoopSettings, ReasoningLoop};
use crate::retry::RetryPolicy;
use crate::tool_registry::ToolRegistry;
use crate::truncation::{ContextMetrics, EvidenceBundle, truncate_to_budget};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use warden_proto::{
    AgentError, Diagnosis, ErrorCategory, HandoffMessage, IncidentStatus, MessageBus, Precondition,
    ReasoningService, StageId, StructuredOutcome, ToolProvider, Topic, TriggerEvent,
};

pub struct IntakeStage {
    lifecycle: Lifecycle,
    bus: Arc<dyn MessageBus>,
    archive: Arc<dyn EvidenceArchive>,
    reasoner: Arc<dyn ReasoningService>,
    tools: Arc<dyn ToolProvider>,
    registry: ToolRegistry,
    settings: LoopSettings,
    retry: RetryPolicy,
    intake: IntakeConfig,
    storage: StorageConfig,
    handoff_topic: Topic,
}

impl IntakeStage {
    pub fn new(collaborators: &Collaborators, config: &WardenConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(
                collaborators.store.clone(),
                collaborators.clock.clone(),
                config.storage.error_reason_max_bytes,
            ),
            bus: collaborators.bus.clone(),
            archive: collaborators.archive.clone(),
            reasoner: collaborators.reasoner.clone(),
            tools: collaborators.tools.clone(),
            registry: ToolRegistry::intake(),
            settings: LoopSettings::new(
                config.reasoning.diagnosis,
                Duration::from_secs(config.reasoning.deadline_buffer_secs),
            ),
            retry: RetryPolicy::from_config(&config.retry),
            intake: config.intake.clone(),
            storage: config.storage.clone(),
            handoff_topic: Topic::new(config.topics.handoff.clone()),
        }
    }

    /// Handles one triggering event. Always returns an acknowledgment.
    pub async fn handle(&self, raw: &Value) -> StageAck {
        let event = match serde_json::from_value::<TriggerEvent>(raw.clone()) {
            Ok(event) => event,
            Err(e) => return self.record_malformed(raw, &e.to_string()).await,
        };
        let id = event.incident_id();
        info!(incident_id = %id, error_type = %event.error_type, "Triggering event received");

        match self.process(&id, &event, raw).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(incident_id = %id, error = %e, "Intake aborted");
                StageAck::aborted(id, e.to_string())
            }
        }
    }

    async fn record_malformed(&self, raw: &Value, reason: &str) -> StageAck {
        let id = format!(
            "malformed#{}#{:016x}",
            self.lifecycle.now().to_rfc3339(),
            payload_fingerprint(raw)
        );
        warn!(incident_id = %id, reason, "Malformed triggering event");
        let detail = format!("malformed event: {reason}");
        match self
            .lifecycle
            .insert_failed(&id, StageId::intake(), ErrorCategory::Validation, &detail)
            .await
        {
            Ok(Some(_)) => StageAck::new(id, IncidentStatus::Failed)
                .with_error(ErrorCategory::Validation)
                .with_detail(detail),
            Ok(None) => StageAck::already_handled(id, Some(IncidentStatus::Failed)),
            Err(e) => StageAck::aborted(id, e.to_string()),
        }
    }

    async fn process(
        &self,
        id: &str,
        event: &TriggerEvent,
        raw: &Value,
    ) -> Result<StageAck, LifecycleError> {
        if let Some(ack) = self.dedup_or_recover(id).await? {
            return Ok(ack);
        }

        let claim = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Received),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Investigating)
                    .owner(StageId::intake()),
            )
            .await?;
        if !claim.is_won() {
            return Ok(StageAck::already_handled(id, None));
        }

        let deadline = Instant::now() + Duration::from_secs(self.intake.stage_timeout_secs);
        let retried = self
            .retry
            .run(|attempt| self.attempt(id, raw, attempt, deadline))
            .await;
        let attempts = retried.attempts;
        let backoffs = retried.backoffs;

        let ack = match retried.result {
            Ok(Some(result)) => {
                self.archive_context(id, event, raw, &result).await;
                self.archive_audit(id, attempts, &result).await;
                match result.outcome {
                    Some(diagnosis) => self.complete(id, diagnosis).await?,
                    None => {
                        let reason = format!("no diagnosis produced: {}", result.termination);
                        self.fail(id, ErrorCategory::Unknown, &reason).await?
                    }
                }
            }
            Ok(None) => StageAck::already_handled(id, None).with_detail("preempted"),
            Err(err) => self.fail(id, err.category, &err.message).await?,
        };
        Ok(ack.with_attempts(attempts, backoffs))
    }

    async fn dedup_or_recover(&self, id: &str) -> Result<Option<StageAck>, LifecycleError> {
        let Some(record) = self.lifecycle.get(id).await? else {
            self.lifecycle.create(id, StageId::intake()).await?;
            return Ok(None);
        };

        match record.status {
            IncidentStatus::Received => {
                info!(incident_id = id, "Resuming incident left in RECEIVED");
                Ok(None)
            }
            IncidentStatus::Investigating => {
                let age = record.age(self.lifecycle.now());
                let fresh = self.intake.staleness().is_none_or(|staleness| age < staleness);
                if fresh {
                    info!(incident_id = id, age_secs = age.num_seconds(), "Investigation in progress elsewhere");
                    return Ok(Some(StageAck::already_handled(id, Some(record.status))));
                }
                warn!(incident_id = id, age_secs = age.num_seconds(), "Resetting stale investigation");
                let reset = self
                    .lifecycle
                    .transition(
                        id,
                        Precondition::status(IncidentStatus::Investigating),
                        self.lifecycle
                            .patch()
                            .status(IncidentStatus::Received)
                            .owner(StageId::intake()),
                    )
                    .await?;
                Ok(match reset {
                    Transition::Won(_) => None,
                    Transition::Lost => Some(StageAck::already_handled(id, None)),
                })
            }
            status => {
                info!(incident_id = id, status = %status, "Incident already handled");
                Ok(Some(StageAck::already_handled(id, Some(status))))
            }
        }
    }

    /// One reasoning attempt. `Ok(None)` means the record left
    /// `INVESTIGATING` under us and the attempt was abandoned.
    async fn attempt(
        &self,
        id: &str,
        raw: &Value,
        attempt: u32,
        deadline: Instant,
    ) -> Result<Option<LoopResult<Diagnosis>>, AgentError> {
        if attempt > 1 {
            match self.lifecycle.touch(id, IncidentStatus::Investigating).await {
                Ok(Transition::Won(_)) => {}
                Ok(Transition::Lost) => return Ok(None),
                Err(e) => return Err(AgentError::new(ErrorCategory::Connectivity, e.to_string())),
            }
        }
        info!(incident_id = id, attempt, "Running diagnosis");
        ReasoningLoop::new(
            self.reasoner.as_ref(),
            self.tools.as_ref(),
            &self.registry,
            self.settings,
        )
        .run::<Diagnosis>(DIAGNOSIS_SYSTEM_PROMPT, diagnosis_input(raw), deadline)
        .await
        .map(Some)
    }

    async fn complete(&self, id: &str, diagnosis: Diagnosis) -> Result<StageAck, LifecycleError> {
        let diagnosed = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Investigating),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Diagnosed)
                    .diagnosis(diagnosis.clone()),
            )
            .await?;
        if !diagnosed.is_won() {
            return Ok(StageAck::already_handled(id, None));
        }

        let claimed = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Diagnosed),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Resolving)
                    .owner(StageId::intake()),
            )
            .await?;
        if !claimed.is_won() {
            return Ok(StageAck::new(id, IncidentStatus::Diagnosed));
        }

        let handoff = HandoffMessage {
            incident_id: id.to_string(),
            diagnosis,
            attempt: 0,
        };
        let published = match handoff.to_event(&self.handoff_topic, StageId::intake()) {
            Ok(event) => self.bus.publish(event).await,
            Err(e) => Err(e),
        };
        match published {
            Ok(()) => {
                info!(incident_id = id, topic = %self.handoff_topic, "Handoff published");
                Ok(StageAck::new(id, IncidentStatus::Resolving))
            }
            Err(e) => {
                warn!(incident_id = id, error = %e, "Handoff publish failed");
                self.handoff_failed(id).await
            }
        }
    }

    async fn handoff_failed(&self, id: &str) -> Result<StageAck, LifecycleError> {
        let moved = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Resolving).owned_by(StageId::intake()),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::ProposalFailed)
                    .error(ErrorCategory::Connectivity, "handoff publish failed"),
            )
            .await?;
        let status = if moved.is_won() {
            IncidentStatus::ProposalFailed
        } else {
            IncidentStatus::Resolving
        };
        let mut ack = StageAck::new(id, status).with_error(ErrorCategory::Connectivity);
        ack.handoff_failed = true;
        Ok(ack)
    }

    async fn fail(
        &self,
        id: &str,
        category: ErrorCategory,
        reason: &str,
    ) -> Result<StageAck, LifecycleError> {
        error!(incident_id = id, category = %category, reason, "Diagnosis failed");
        let failed = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Investigating),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Failed)
                    .error(category, reason),
            )
            .await?;
        Ok(match failed {
            Transition::Won(_) => StageAck::new(id, IncidentStatus::Failed)
                .with_error(category)
                .with_detail(reason),
            Transition::Lost => StageAck::already_handled(id, None),
        })
    }

    async fn archive_context(
        &self,
        id: &str,
        event: &TriggerEvent,
        raw: &Value,
        result: &LoopResult<Diagnosis>,
    ) {
        let mut bundle = EvidenceBundle::new(raw.clone(), result.evidence.clone());
        let raw_sizes = bundle.tool_sizes();
        let report = truncate_to_budget(&mut bundle, self.intake.context_token_budget);
        let final_tokens = bundle.tool_sizes().values().sum();
        let metrics = ContextMetrics::compute(
            &raw_sizes,
            self.intake.context_token_budget,
            final_tokens,
            &report,
        );
        info!(
            incident_id = id,
            raw_tokens = metrics.raw_tokens_total,
            final_tokens = metrics.final_tokens,
            truncated = metrics.truncated,
            "Evidence bundle prepared"
        );

        let record = ContextRecord {
            incident_id: id.to_string(),
            error_type: event.error_type.clone(),
            event: bundle.event,
            tools: bundle.tools,
            metrics,
            stored_at: self.lifecycle.now(),
        };
        if let Err(e) = self.archive.put_context(record).await {
            warn!(incident_id = id, error = %e, "Failed to archive evidence bundle");
        }
    }

    async fn archive_audit(&self, id: &str, attempts: u32, result: &LoopResult<Diagnosis>) {
        let record = AuditRecord::from_loop(
            id,
            StageId::intake(),
            attempts,
            result,
            Diagnosis::SUBMIT_TOOL,
            &self.storage,
            self.lifecycle.now(),
        );
        if let Err(e) = self.archive.put_audit(record).await {
            warn!(incident_id = id, error = %e, "Failed to archive diagnosis transcript");
        }
    }
}

/// Stable within a process; tells apart malformed events received at the same instant.
fn payload_fingerprint(raw: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.to_string().hash(&mut hasher);
    hasher.finish()
}

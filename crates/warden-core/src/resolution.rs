//! Stage 2: turn a diagnosis into a remediation proposal.
//!
//! Resolution consumes handoff messages. It claims the incident with a
//! conditional write before doing any work, so a duplicate delivery runs
//! the proposal loop at most once. Every failure lands in
//! `PROPOSAL_FAILED`, which the Watchdog may re-drive.

use crate::ack::StageAck;
use crate::archive::{AuditRecord, EvidenceArchive};
use crate::collaborators::Collaborators;
use crate::config::{StorageConfig, WardenConfig};
use crate::lifecycle::{Lifecycle, LifecycleError, Transition};
use crate::local_bus::InMemoryMessageBus;
use crate::prompts::{PROPOSAL_SYSTEM_PROMPT, proposal_input};
use crate::reasoning_loop::{LoopResult, LoopSettings, ReasoningLoop};
use crate::retry::RetryPolicy;
use crate::text::truncate_with_ellipsis;
use crate::tool_registry::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use warden_proto::{
    AgentError, ErrorCategory, Event, HandoffMessage, IncidentRecord, IncidentStatus, Precondition,
    ReasoningService, RemediationProposal, StageId, StructuredOutcome, ToolProvider,
};

pub struct ResolutionStage {
    lifecycle: Lifecycle,
    archive: Arc<dyn EvidenceArchive>,
    reasoner: Arc<dyn ReasoningService>,
    tools: Arc<dyn ToolProvider>,
    registry: ToolRegistry,
    settings: LoopSettings,
    retry: RetryPolicy,
    stage_timeout: Duration,
    storage: StorageConfig,
}

impl ResolutionStage {
    pub fn new(collaborators: &Collaborators, config: &WardenConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(
                collaborators.store.clone(),
                collaborators.clock.clone(),
                config.storage.error_reason_max_bytes,
            ),
            archive: collaborators.archive.clone(),
            reasoner: collaborators.reasoner.clone(),
            tools: collaborators.tools.clone(),
            registry: ToolRegistry::resolution(),
            settings: LoopSettings::new(
                config.reasoning.proposal,
                Duration::from_secs(config.reasoning.deadline_buffer_secs),
            ),
            retry: RetryPolicy::from_config(&config.retry),
            stage_timeout: Duration::from_secs(config.resolution.stage_timeout_secs),
            storage: config.storage.clone(),
        }
    }

    /// Handles one delivered handoff event. Always returns an acknowledgment.
    pub async fn handle_event(&self, event: &Event) -> StageAck {
        match serde_json::from_str::<HandoffMessage>(&event.payload) {
            Ok(message) => self.handle(&message).await,
            Err(e) => {
                warn!(
                    topic = %event.topic,
                    payload = %truncate_with_ellipsis(&event.payload, 200),
                    error = %e,
                    "Malformed handoff payload"
                );
                StageAck::aborted("", "malformed payload")
            }
        }
    }

    /// Drains and handles every handoff queued for Resolution on `bus`.
    pub async fn drain(&self, bus: &InMemoryMessageBus) -> Vec<StageAck> {
        let mut acks = Vec::new();
        for event in bus.take_pending(&StageId::resolution()) {
            acks.push(self.handle_event(&event).await);
        }
        acks
    }

    pub async fn handle(&self, message: &HandoffMessage) -> StageAck {
        let id = message.incident_id.as_str();
        info!(incident_id = id, attempt = message.attempt, "Handoff received");
        match self.process(message).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(incident_id = id, error = %e, "Resolution aborted");
                StageAck::aborted(id, e.to_string())
            }
        }
    }

    async fn process(&self, message: &HandoffMessage) -> Result<StageAck, LifecycleError> {
        let id = message.incident_id.as_str();
        let Some(record) = self.lifecycle.get(id).await? else {
            warn!(incident_id = id, "Handoff for unknown incident");
            return Ok(StageAck::already_handled(id, None).with_detail("unknown incident"));
        };
        if !self.claim(&record).await? {
            return Ok(StageAck::already_handled(id, Some(record.status)));
        }

        let deadline = Instant::now() + self.stage_timeout;
        let retried = self
            .retry
            .run(|attempt| self.attempt(message, attempt, deadline))
            .await;
        let attempts = retried.attempts;
        let backoffs = retried.backoffs;

        let ack = match retried.result {
            Ok(Some(result)) => {
                self.archive_audit(id, attempts, &result).await;
                match result.outcome {
                    Some(proposal) => self.complete(id, proposal).await?,
                    None => {
                        let reason = format!("no proposal produced: {}", result.termination);
                        self.fail(id, ErrorCategory::Unknown, &reason).await?
                    }
                }
            }
            Ok(None) => StageAck::already_handled(id, None).with_detail("preempted"),
            Err(err) => self.fail(id, err.category, &err.message).await?,
        };
        Ok(ack.with_attempts(attempts, backoffs))
    }

    /// Takes ownership of the record for this stage.
    ///
    /// A `DIAGNOSED` record is claimed directly. A `RESOLVING` record is
    /// claimed only while it is still owned by the stage that published the
    /// handoff; once Resolution owns it, a redelivery loses.
    async fn claim(&self, record: &IncidentRecord) -> Result<bool, LifecycleError> {
        let expected = match record.status {
            IncidentStatus::Diagnosed => Precondition::status(IncidentStatus::Diagnosed),
            IncidentStatus::Resolving if record.owner_stage != StageId::resolution() => {
                Precondition::status(IncidentStatus::Resolving).owned_by(record.owner_stage.clone())
            }
            status => {
                info!(incident_id = %record.id, status = %status, owner = %record.owner_stage, "Incident not eligible for resolution");
                return Ok(false);
            }
        };
        let claimed = self
            .lifecycle
            .transition(
                &record.id,
                expected,
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Resolving)
                    .owner(StageId::resolution()),
            )
            .await?;
        Ok(claimed.is_won())
    }

    async fn attempt(
        &self,
        message: &HandoffMessage,
        attempt: u32,
        deadline: Instant,
    ) -> Result<Option<LoopResult<RemediationProposal>>, AgentError> {
        let id = message.incident_id.as_str();
        if attempt > 1 {
            match self.lifecycle.touch(id, IncidentStatus::Resolving).await {
                Ok(Transition::Won(_)) => {}
                Ok(Transition::Lost) => return Ok(None),
                Err(e) => return Err(AgentError::new(ErrorCategory::Connectivity, e.to_string())),
            }
        }
        info!(incident_id = id, attempt, "Running proposal");
        ReasoningLoop::new(
            self.reasoner.as_ref(),
            self.tools.as_ref(),
            &self.registry,
            self.settings,
        )
        .run::<RemediationProposal>(
            PROPOSAL_SYSTEM_PROMPT,
            proposal_input(id, &message.diagnosis),
            deadline,
        )
        .await
        .map(Some)
    }

    async fn complete(
        &self,
        id: &str,
        proposal: RemediationProposal,
    ) -> Result<StageAck, LifecycleError> {
        let actions = proposal.actions.len();
        let proposed = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Resolving).owned_by(StageId::resolution()),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Proposed)
                    .proposal(proposal),
            )
            .await?;
        Ok(match proposed {
            Transition::Won(_) => {
                info!(incident_id = id, actions, "Proposal stored");
                StageAck::new(id, IncidentStatus::Proposed)
            }
            Transition::Lost => StageAck::already_handled(id, None),
        })
    }

    async fn fail(
        &self,
        id: &str,
        category: ErrorCategory,
        reason: &str,
    ) -> Result<StageAck, LifecycleError> {
        error!(incident_id = id, category = %category, reason, "Proposal failed");
        let failed = self
            .lifecycle
            .transition(
                id,
                Precondition::status(IncidentStatus::Resolving).owned_by(StageId::resolution()),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::ProposalFailed)
                    .error(category, reason),
            )
            .await?;
        Ok(match failed {
            Transition::Won(_) => StageAck::new(id, IncidentStatus::ProposalFailed)
                .with_error(category)
                .with_detail(reason),
            Transition::Lost => StageAck::already_handled(id, None),
        })
    }

    async fn archive_audit(
        &self,
        id: &str,
        attempts: u32,
        result: &LoopResult<RemediationProposal>,
    ) {
        let record = AuditRecord::from_loop(
            id,
            StageId::resolution(),
            attempts,
            result,
            RemediationProposal::SUBMIT_TOOL,
            &self.storage,
            self.lifecycle.now(),
        );
        if let Err(e) = self.archive.put_audit(record).await {
            warn!(incident_id = id, error = %e, "Failed to archive proposal transcript");
        }
    }
}

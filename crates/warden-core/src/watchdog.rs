//! Periodic sweep that reclaims stuck incidents and re-drives failed proposals.
//!
//! Every mutation is a conditional write, so overlapping or repeated
//! sweeps are safe: a lost write means another sweep already acted.

use crate::collaborators::Collaborators;
use crate::config::{WardenConfig, WatchdogConfig};
use crate::lifecycle::{Lifecycle, LifecycleError, Transition};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_proto::{
    ErrorCategory, HandoffMessage, IncidentRecord, IncidentStatus, MessageBus, Precondition,
    StageId, StateStore, Topic,
};

/// What one sweep did. Observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    /// `INVESTIGATING` records moved to `FAILED`.
    pub stale_failed: usize,
    /// `RESOLVING` records moved to `PROPOSAL_FAILED`.
    pub stale_resolving: usize,
    /// `PROPOSAL_FAILED` records re-driven through the handoff.
    pub retried: usize,
    /// `PROPOSAL_FAILED` records given up on.
    pub exhausted: usize,
    /// Candidates another worker moved first.
    pub skipped: usize,
    /// Candidates whose write failed; they are picked up again next sweep.
    pub errors: usize,
}

impl WatchdogReport {
    pub fn transitioned(&self) -> usize {
        self.stale_failed + self.stale_resolving + self.retried + self.exhausted
    }

    /// Counts a lost race as skipped and a failed write as an error.
    /// Returns true only when the write won.
    fn settle(&mut self, incident_id: &str, outcome: Result<Transition, LifecycleError>) -> bool {
        match outcome {
            Ok(Transition::Won(_)) => true,
            Ok(Transition::Lost) => {
                self.skipped += 1;
                false
            }
            Err(e) => {
                warn!(incident_id, error = %e, "Watchdog write failed");
                self.errors += 1;
                false
            }
        }
    }
}

pub struct Watchdog {
    lifecycle: Lifecycle,
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
    config: WatchdogConfig,
    handoff_topic: Topic,
}

impl Watchdog {
    pub fn new(collaborators: &Collaborators, config: &WardenConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(
                collaborators.store.clone(),
                collaborators.clock.clone(),
                config.storage.error_reason_max_bytes,
            ),
            store: collaborators.store.clone(),
            bus: collaborators.bus.clone(),
            config: config.watchdog.clone(),
            handoff_topic: Topic::new(config.topics.handoff.clone()),
        }
    }

    /// Runs every pass once.
    ///
    /// A failed write on one record is counted in the report and the sweep
    /// moves on. Each pass runs even if an earlier one could not scan; the
    /// first scan error is returned after all passes have run.
    pub async fn sweep(&self) -> Result<WatchdogReport, LifecycleError> {
        let mut report = WatchdogReport::default();
        let investigating = self.fail_stale_investigations(&mut report).await;
        let resolving = self.reclaim_stale_resolutions(&mut report).await;
        let retries = self.retry_failed_proposals(&mut report).await;
        info!(
            stale_failed = report.stale_failed,
            stale_resolving = report.stale_resolving,
            retried = report.retried,
            exhausted = report.exhausted,
            skipped = report.skipped,
            errors = report.errors,
            "Watchdog sweep complete"
        );
        investigating?;
        resolving?;
        retries?;
        Ok(report)
    }

    /// Oldest `updated_at` a record of this age may have, or `None` when
    /// the threshold reaches past the start of time.
    fn cutoff(&self, threshold: Option<Duration>) -> Option<DateTime<Utc>> {
        threshold.and_then(|threshold| self.lifecycle.now().checked_sub_signed(threshold))
    }

    async fn fail_stale_investigations(
        &self,
        report: &mut WatchdogReport,
    ) -> Result<(), LifecycleError> {
        let Some(cutoff) = self.cutoff(self.config.stale_threshold()) else {
            return Ok(());
        };

        for record in self.store.scan(IncidentStatus::Investigating, cutoff).await? {
            warn!(incident_id = %record.id, "Stale investigation");
            let outcome = self
                .lifecycle
                .transition(
                    &record.id,
                    Precondition::status(IncidentStatus::Investigating),
                    self.lifecycle
                        .patch()
                        .status(IncidentStatus::Failed)
                        .owner(StageId::watchdog())
                        .error(ErrorCategory::Unknown, "stale timeout"),
                )
                .await;
            if report.settle(&record.id, outcome) {
                report.stale_failed += 1;
            }
        }
        Ok(())
    }

    async fn reclaim_stale_resolutions(
        &self,
        report: &mut WatchdogReport,
    ) -> Result<(), LifecycleError> {
        let Some(cutoff) = self.cutoff(self.config.stale_threshold()) else {
            return Ok(());
        };

        for record in self.store.scan(IncidentStatus::Resolving, cutoff).await? {
            warn!(incident_id = %record.id, owner = %record.owner_stage, "Stale resolution");
            let outcome = self
                .lifecycle
                .transition(
                    &record.id,
                    Precondition::status(IncidentStatus::Resolving)
                        .owned_by(record.owner_stage.clone()),
                    self.lifecycle
                        .patch()
                        .status(IncidentStatus::ProposalFailed)
                        .owner(StageId::watchdog())
                        .error(ErrorCategory::Unknown, "stale timeout"),
                )
                .await;
            if report.settle(&record.id, outcome) {
                report.stale_resolving += 1;
            }
        }
        Ok(())
    }

    async fn retry_failed_proposals(
        &self,
        report: &mut WatchdogReport,
    ) -> Result<(), LifecycleError> {
        let Some(cutoff) = self.cutoff(self.config.retry_threshold()) else {
            return Ok(());
        };

        for record in self.store.scan(IncidentStatus::ProposalFailed, cutoff).await? {
            if record.retry_count >= self.config.max_retries {
                let outcome = self
                    .give_up(&record, format!("retries exhausted ({})", record.retry_count))
                    .await;
                if report.settle(&record.id, outcome) {
                    report.exhausted += 1;
                }
                continue;
            }
            let Some(diagnosis) = record.diagnosis.clone() else {
                let outcome = self
                    .give_up(&record, "no stored diagnosis to retry".to_string())
                    .await;
                if report.settle(&record.id, outcome) {
                    report.exhausted += 1;
                }
                continue;
            };

            let attempt = record.retry_count + 1;
            let claimed = self
                .lifecycle
                .transition(
                    &record.id,
                    Precondition::status(IncidentStatus::ProposalFailed),
                    self.lifecycle
                        .patch()
                        .status(IncidentStatus::Resolving)
                        .owner(StageId::watchdog())
                        .retry_count(attempt),
                )
                .await;
            if !report.settle(&record.id, claimed) {
                debug!(incident_id = %record.id, "Retry not claimed");
                continue;
            }

            let handoff = HandoffMessage {
                incident_id: record.id.clone(),
                diagnosis,
                attempt,
            };
            let published = match handoff.to_event(&self.handoff_topic, StageId::watchdog()) {
                Ok(event) => self.bus.publish(event).await,
                Err(e) => Err(e),
            };
            match published {
                Ok(()) => {
                    info!(incident_id = %record.id, attempt, max_retries = self.config.max_retries, "Re-driving proposal");
                    report.retried += 1;
                }
                Err(e) => {
                    warn!(incident_id = %record.id, error = %e, "Retry handoff publish failed");
                    let reverted = self
                        .lifecycle
                        .transition(
                            &record.id,
                            Precondition::status(IncidentStatus::Resolving)
                                .owned_by(StageId::watchdog()),
                            self.lifecycle
                                .patch()
                                .status(IncidentStatus::ProposalFailed)
                                .error(ErrorCategory::Connectivity, "handoff publish failed"),
                        )
                        .await;
                    // Either way the record is out of our hands until the next sweep.
                    report.settle(&record.id, reverted);
                }
            }
        }
        Ok(())
    }

    async fn give_up(
        &self,
        record: &IncidentRecord,
        reason: String,
    ) -> Result<Transition, LifecycleError> {
        warn!(incident_id = %record.id, retry_count = record.retry_count, reason = %reason, "Giving up on incident");
        let category = record.error_category.unwrap_or(ErrorCategory::Unknown);
        self.lifecycle
            .transition(
                &record.id,
                Precondition::status(IncidentStatus::ProposalFailed),
                self.lifecycle
                    .patch()
                    .status(IncidentStatus::Failed)
                    .owner(StageId::watchdog())
                    .error(category, reason),
            )
            .await
    }
}

//! Evidence and audit archive.
//!
//! Intake stores the truncated evidence bundle for every incident it
//! investigates. Both reasoning stages store an audit record of the
//! exchange. Archive writes are observability: a failed write is logged
//! and the stage carries on.

use crate::config::StorageConfig;
use crate::reasoning_loop::LoopResult;
use crate::transcript::{TranscriptStep, serialize_messages, truncate_for_storage};
use crate::truncation::ContextMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use warden_proto::{StageId, StoreError, TokenUsage};

/// The evidence an incident was diagnosed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub incident_id: String,
    pub error_type: String,
    pub event: Value,
    pub tools: BTreeMap<String, Value>,
    pub metrics: ContextMetrics,
    pub stored_at: DateTime<Utc>,
}

/// One reasoning exchange as persisted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub incident_id: String,
    pub stage: StageId,
    pub attempts: u32,
    pub steps: Vec<TranscriptStep>,
    pub reasoning_truncated: bool,
    pub token_usage: Vec<TokenUsage>,
    pub total_tokens: u64,
    pub llm_calls: usize,
    pub termination: String,
    pub stored_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Renders a finished loop, dropping middle steps past the storage ceiling.
    pub fn from_loop<O>(
        incident_id: &str,
        stage: StageId,
        attempts: u32,
        result: &LoopResult<O>,
        submit_tool: &str,
        storage: &StorageConfig,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let (steps, reasoning_truncated) = truncate_for_storage(
            serialize_messages(&result.messages, submit_tool),
            storage.transcript_max_bytes,
            storage.transcript_keep_head,
            storage.transcript_keep_tail,
        );
        Self {
            incident_id: incident_id.to_string(),
            stage,
            attempts,
            steps,
            reasoning_truncated,
            token_usage: result.usage.clone(),
            total_tokens: result.total_tokens,
            llm_calls: result.llm_calls,
            termination: result.termination.to_string(),
            stored_at,
        }
    }
}

#[async_trait]
pub trait EvidenceArchive: Send + Sync {
    async fn put_context(&self, record: ContextRecord) -> Result<(), StoreError>;
    async fn put_audit(&self, record: AuditRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    contexts: HashMap<String, ContextRecord>,
    audits: Vec<AuditRecord>,
    failing: bool,
}

/// In-memory [`EvidenceArchive`].
#[derive(Default)]
pub struct InMemoryArchive {
    inner: Mutex<Inner>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent write fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn check_writable(inner: &Inner) -> Result<(), StoreError> {
        if inner.failing {
            return Err(StoreError::Backend("archive unavailable".to_string()));
        }
        Ok(())
    }

    pub fn context(&self, incident_id: &str) -> Option<ContextRecord> {
        self.lock().contexts.get(incident_id).cloned()
    }

    /// Audit records for an incident, oldest first.
    pub fn audits(&self, incident_id: &str) -> Vec<AuditRecord> {
        self.lock()
            .audits
            .iter()
            .filter(|audit| audit.incident_id == incident_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EvidenceArchive for InMemoryArchive {
    async fn put_context(&self, record: ContextRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_writable(&inner)?;
        inner.contexts.insert(record.incident_id.clone(), record);
        Ok(())
    }

    async fn put_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_writable(&inner)?;
        inner.audits.push(record);
        Ok(())
    }
}

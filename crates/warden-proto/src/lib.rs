//! # warden-proto
//!
//! Shared types, error definitions, and collaborator traits for Warden.
//!
//! This crate provides the foundational abstractions used across all Warden
//! crates, including:
//! - The incident record, its lifecycle states, and conditional-write types
//! - The error taxonomy and classification of raw service failures
//! - Event and `EventBus` types for handing incidents between stages
//! - Outcome and evidence-tool schemas
//! - Traits for the state store, message bus, reasoning service, and tools

mod bus;
mod error;
mod event;
mod event_bus;
mod incident;
mod messages;
mod outcome;
mod reasoning;
mod stage;
mod store;
pub mod tools;
mod topic;

pub use bus::{BusError, MessageBus};
pub use error::{AgentError, ErrorCategory, ServiceError, classify};
pub use event::Event;
pub use event_bus::EventBus;
pub use incident::{IncidentRecord, IncidentStatus, Precondition, RecordPatch};
pub use messages::{HandoffMessage, TriggerEvent};
pub use outcome::{
    ApiCall, Diagnosis, EvidencePointer, RemediationProposal, RemediationStep, StructuredOutcome,
};
pub use reasoning::{
    DirectiveKind, Message, ReasoningResponse, ReasoningService, TokenUsage, ToolCall,
    ToolDefinition, ToolProvider,
};
pub use stage::{Stage, StageId};
pub use store::{StateStore, StoreError};
pub use topic::Topic;

//! # warden-core
//!
//! The incident lifecycle orchestrator.
//!
//! This crate provides:
//! - Conditional-write lifecycle helpers with dedup and crash recovery
//! - The Intake, Resolution, and Watchdog stages
//! - The reasoning loop driver and its tool registry
//! - Evidence truncation, transcript rendering, and the audit archive
//! - Call-level retry, configuration, and in-memory adapters
//! - Scenario replay for tests and the CLI

mod ack;
pub mod archive;
pub mod clock;
mod collaborators;
mod config;
mod intake;
pub mod lifecycle;
pub mod local_bus;
pub mod prompts;
pub mod reasoning_loop;
mod resolution;
pub mod retry;
pub mod state_store;
pub mod testing;
mod text;
pub mod tool_registry;
pub mod transcript;
pub mod truncation;
mod watchdog;

pub use ack::StageAck;
pub use archive::{AuditRecord, ContextRecord, EvidenceArchive, InMemoryArchive};
pub use clock::{Clock, SystemClock};
pub use collaborators::Collaborators;
pub use config::{
    ConfigError, IntakeConfig, LoopLimits, ReasoningConfig, ResolutionConfig, RetryConfig,
    StorageConfig, TopicsConfig, WardenConfig, WatchdogConfig,
};
pub use intake::IntakeStage;
pub use lifecycle::{Lifecycle, LifecycleError, Transition};
pub use local_bus::InMemoryMessageBus;
pub use reasoning_loop::{LoopResult, LoopSettings, ReasoningLoop, TerminationReason};
pub use resolution::ResolutionStage;
pub use retry::{Retried, RetryPolicy};
pub use state_store::{InMemoryStateStore, StatusChange};
pub use tool_registry::{ToolRegistry, ToolSpec};
pub use truncation::{ContextMetrics, EvidenceBundle, TruncationReport, truncate_to_budget};
pub use watchdog::{Watchdog, WatchdogReport};

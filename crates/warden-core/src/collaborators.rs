//! The external services a stage talks to.

use crate::archive::EvidenceArchive;
use crate::clock::Clock;
use std::sync::Arc;
use warden_proto::{MessageBus, ReasoningService, StateStore, ToolProvider};

/// Shared handles to every collaborator, cloned into each stage.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<dyn MessageBus>,
    pub archive: Arc<dyn EvidenceArchive>,
    pub reasoner: Arc<dyn ReasoningService>,
    pub tools: Arc<dyn ToolProvider>,
    pub clock: Arc<dyn Clock>,
}

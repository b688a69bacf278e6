//! The message bus contract.

use crate::Event;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to encode message for {topic}: {reason}")]
    Encode { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// At-least-once publish channel between stages.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), BusError>;
}

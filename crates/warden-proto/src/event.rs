//! Event types for pub/sub messaging.

use crate::{StageId, Topic};
use serde::{Deserialize, Serialize};

/// A message carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The routing topic for this event.
    pub topic: Topic,

    /// The raw message body. Consumers parse it themselves so that a
    /// malformed body reaches the consumer instead of failing in transit.
    pub payload: String,

    /// The stage that published this event (if any).
    pub source: Option<StageId>,
}

impl Event {
    /// Creates a new event with the given topic and payload.
    pub fn new(topic: impl Into<Topic>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            source: None,
        }
    }

    /// Sets the source stage for this event.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<StageId>) -> Self {
        self.source = Some(source.into());
        self
    }
}

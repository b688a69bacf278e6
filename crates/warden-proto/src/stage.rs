//! Stage identities.
//!
//! A stage is one role that may write an incident record: Intake,
//! Resolution, or the Watchdog. The stage that last wrote a record is kept
//! on the record as its owner.

use crate::Topic;
use serde::{Deserialize, Serialize};

/// Unique identifier for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub const INTAKE: &'static str = "intake";
    pub const RESOLUTION: &'static str = "resolution";
    pub const WATCHDOG: &'static str = "watchdog";

    /// Creates a new stage ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn intake() -> Self {
        Self::new(Self::INTAKE)
    }

    pub fn resolution() -> Self {
        Self::new(Self::RESOLUTION)
    }

    pub fn watchdog() -> Self {
        Self::new(Self::WATCHDOG)
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stage as registered on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Unique identifier for this stage.
    pub id: StageId,

    /// Human-readable name.
    pub name: String,

    /// Topic patterns this stage consumes.
    pub subscriptions: Vec<Topic>,
}

impl Stage {
    /// Creates a new stage with no subscriptions.
    pub fn new(id: impl Into<StageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            subscriptions: Vec::new(),
        }
    }

    /// The Resolution stage consumes the diagnosis handoff.
    pub fn resolution(handoff_topic: impl Into<Topic>) -> Self {
        Self::new(StageId::resolution(), "Resolution").subscribe(handoff_topic)
    }

    /// Adds a subscription to this stage.
    #[must_use]
    pub fn subscribe(mut self, topic: impl Into<Topic>) -> Self {
        self.subscriptions.push(topic.into());
        self
    }

    /// Checks if this stage is subscribed to the given topic.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.iter().any(|sub| sub.matches(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_subscribes_to_handoff() {
        let stage = Stage::resolution("incident.diagnosed");
        assert_eq!(stage.id.as_str(), "resolution");
        assert!(stage.is_subscribed(&Topic::new("incident.diagnosed")));
        assert!(!stage.is_subscribed(&Topic::new("incident.received")));
    }

    #[test]
    fn test_stage_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&StageId::watchdog()).unwrap();
        assert_eq!(json, "\"watchdog\"");
    }
}

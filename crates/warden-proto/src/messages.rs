//! Wire formats consumed and produced by the stages.

use crate::{BusError, Diagnosis, Event, StageId, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_error_type() -> String {
    "unknown".to_string()
}

/// The event that opens an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The affected workload.
    #[serde(alias = "lambda")]
    pub lambda_name: String,

    #[serde(alias = "ts")]
    pub timestamp: String,

    #[serde(default = "default_error_type")]
    pub error_type: String,

    /// Any other fields the producer attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerEvent {
    /// The stable incident id: workload name and event timestamp.
    pub fn incident_id(&self) -> String {
        format!("{}#{}", self.lambda_name, self.timestamp)
    }
}

/// Hands a diagnosed incident from Intake (or the Watchdog) to Resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub incident_id: String,
    pub diagnosis: Diagnosis,
    /// 0 for the first handoff, the retry count for watchdog re-drives.
    #[serde(default)]
    pub attempt: u32,
}

impl HandoffMessage {
    /// Encodes the message as a bus event.
    pub fn to_event(&self, topic: &Topic, source: StageId) -> Result<Event, BusError> {
        let payload = serde_json::to_string(self).map_err(|e| BusError::Encode {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Event::new(topic.clone(), payload).with_source(source))
    }
}

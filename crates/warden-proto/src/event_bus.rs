//! In-process event bus.
//!
//! The event bus routes events to subscribed stages based on topic
//! patterns. Delivery is queue-based: each stage drains its own pending
//! events. Observers receive every published event before routing, which
//! is how the replay runner records publishes.

use crate::{Event, Stage, StageId};
use std::collections::HashMap;

/// Type alias for the observer callback function.
type Observer = Box<dyn Fn(&Event) + Send + 'static>;

/// Central pub/sub hub for routing events between stages.
#[derive(Default)]
pub struct EventBus {
    /// Registered stages indexed by ID.
    stages: HashMap<StageId, Stage>,

    /// Pending events for each stage.
    pending: HashMap<StageId, Vec<Event>>,

    /// Observers that receive all published events.
    observers: Vec<Observer>,
}

impl EventBus {
    /// Creates a new empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer that receives all published events.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Registers a stage with the event bus.
    pub fn register(&mut self, stage: Stage) {
        let id = stage.id.clone();
        self.stages.insert(id.clone(), stage);
        self.pending.entry(id).or_default();
    }

    /// Publishes an event to all subscribed stages.
    ///
    /// Returns the list of stage IDs that received the event.
    pub fn publish(&mut self, event: Event) -> Vec<StageId> {
        for observer in &self.observers {
            observer(&event);
        }

        let mut recipients = Vec::new();
        for (id, stage) in &self.stages {
            if stage.is_subscribed(&event.topic) {
                self.pending
                    .entry(id.clone())
                    .or_default()
                    .push(event.clone());
                recipients.push(id.clone());
            }
        }
        recipients
    }

    /// Takes all pending events for a stage.
    pub fn take_pending(&mut self, stage_id: &StageId) -> Vec<Event> {
        self.pending
            .get_mut(stage_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

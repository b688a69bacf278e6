//! In-process message bus.
//!
//! Wraps the topic-routing [`EventBus`] behind the [`MessageBus`] seam so the
//! stages can be driven end to end without a broker. Published events queue
//! up per subscribed stage until drained with [`InMemoryMessageBus::take_pending`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use warden_proto::{BusError, Event, EventBus, MessageBus, Stage, StageId, Topic};

pub struct InMemoryMessageBus {
    bus: Mutex<EventBus>,
    published: Arc<Mutex<Vec<Event>>>,
    failing_publishes: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryMessageBus {
    /// Creates a bus with Resolution subscribed to `handoff_topic`.
    pub fn new(handoff_topic: impl Into<Topic>) -> Self {
        let mut bus = EventBus::new();
        bus.register(Stage::resolution(handoff_topic));

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        bus.add_observer(move |event: &Event| lock(&sink).push(event.clone()));

        Self {
            bus: Mutex::new(bus),
            published,
            failing_publishes: Mutex::new(0),
        }
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        *lock(&self.failing_publishes) = n;
    }

    /// Drains the events queued for a stage.
    pub fn take_pending(&self, stage: &StageId) -> Vec<Event> {
        lock(&self.bus).take_pending(stage)
    }

    /// Every event accepted by the bus, in publish order.
    pub fn published(&self) -> Vec<Event> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        {
            let mut failing = lock(&self.failing_publishes);
            if *failing > 0 {
                *failing -= 1;
                return Err(BusError::Publish {
                    topic: event.topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
        }
        let recipients = lock(&self.bus).publish(event);
        debug!(recipients = recipients.len(), "Event routed");
        Ok(())
    }
}

//! Scripted stand-ins for the external collaborators.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use warden_proto::tools::{EMPTY_RESPONSE_ERROR, UNKNOWN_TOOL_ERROR};
use warden_proto::{
    Message, ReasoningResponse, ReasoningService, ServiceError, ToolDefinition, ToolProvider,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(ReasoningResponse),
    Fail(ServiceError),
}

/// A [`ReasoningService`] that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<ReasoningResponse>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A reasoner that gives the same reply forever.
    pub fn repeating(response: ReasoningResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn then(self, response: ReasoningResponse) -> Self {
        lock(&self.script).push_back(ScriptStep::Respond(response));
        self
    }

    #[must_use]
    pub fn then_fail(self, err: ServiceError) -> Self {
        lock(&self.script).push_back(ScriptStep::Fail(err));
        self
    }

    /// The message list of every call, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn invoke(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ReasoningResponse, ServiceError> {
        lock(&self.calls).push(messages.to_vec());
        let next = lock(&self.script).pop_front();
        match next {
            Some(ScriptStep::Respond(response)) => Ok(response),
            Some(ScriptStep::Fail(err)) => Err(err),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ServiceError::Other("reasoning script exhausted".to_string())),
        }
    }
}

/// A [`ToolProvider`] with canned responses.
///
/// Unknown tools answer with the canonical unknown-tool body and an empty
/// canned body is reported as the canonical empty-response body.
#[derive(Default)]
pub struct StaticToolProvider {
    responses: HashMap<String, String>,
    failures: HashMap<String, ServiceError>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StaticToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_response(mut self, tool: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses.insert(tool.into(), body.into());
        self
    }

    /// Makes every call to `tool` fail at the transport level.
    #[must_use]
    pub fn with_failure(mut self, tool: impl Into<String>, err: ServiceError) -> Self {
        self.failures.insert(tool.into(), err);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<String, ServiceError> {
        lock(&self.calls).push((name.to_string(), arguments.clone()));
        if let Some(err) = self.failures.get(name) {
            return Err(err.clone());
        }
        Ok(match self.responses.get(name) {
            Some(body) if body.trim().is_empty() => EMPTY_RESPONSE_ERROR.to_string(),
            Some(body) => body.clone(),
            None => UNKNOWN_TOOL_ERROR.to_string(),
        })
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

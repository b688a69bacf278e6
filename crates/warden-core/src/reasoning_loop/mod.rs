//! Tool-calling control loop shared by Intake and Resolution.
//!
//! The loop threads a [`LoopState`] through repeated calls to the reasoning
//! service. Each response is routed to one of: execute the requested tools,
//! accept a submitted outcome, nudge once toward submission, or stop with no
//! outcome. A step limit bounds the loop independently of the deadline.
//!
//! Validation problems never leave the loop: bad tool arguments, malformed
//! tool responses, and invalid submissions are fed back to the service as
//! tool errors. Service and transport failures are classified and returned
//! to the caller's retry wrapper.

#[cfg(test)]
mod tests;

use crate::config::LoopLimits;
use crate::prompts::{budget_directive, deadline_directive, nudge_directive};
use crate::tool_registry::ToolRegistry;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_proto::tools::EMPTY_RESPONSE_ERROR;
use warden_proto::{
    AgentError, DirectiveKind, Message, ReasoningResponse, ReasoningService, StructuredOutcome,
    TokenUsage, ToolCall, ToolProvider, classify,
};

/// Limits for one run of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Maximum number of reasoning service calls.
    pub max_steps: u32,
    pub token_budget: u64,
    /// Remaining time below which the deadline directive is injected.
    pub deadline_buffer: Duration,
}

impl LoopSettings {
    pub fn new(limits: LoopLimits, deadline_buffer: Duration) -> Self {
        Self {
            max_steps: limits.max_steps,
            token_budget: limits.token_budget,
            deadline_buffer,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A valid outcome was submitted.
    Submitted,
    /// The service answered in text again after being nudged.
    NoOutcome,
    /// The step limit was reached.
    StepLimit,
    /// The deadline passed between steps.
    DeadlineExceeded,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Submitted => "submitted",
            TerminationReason::NoOutcome => "no_outcome",
            TerminationReason::StepLimit => "step_limit",
            TerminationReason::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminationReason::Submitted)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct LoopResult<O> {
    pub outcome: Option<O>,
    pub termination: TerminationReason,
    /// The full exchange, including the system prompt and injected directives.
    pub messages: Vec<Message>,
    /// Token usage of each service call, in order.
    pub usage: Vec<TokenUsage>,
    pub total_tokens: u64,
    pub llm_calls: usize,
    /// Last validated response of each evidence tool.
    pub evidence: BTreeMap<String, Value>,
    /// Directives injected, in order.
    pub directives: Vec<DirectiveKind>,
}

struct LoopState<O> {
    messages: Vec<Message>,
    outcome: Option<O>,
    nudged: bool,
    total_tokens: u64,
    usage: Vec<TokenUsage>,
    evidence: BTreeMap<String, Value>,
    directives: Vec<DirectiveKind>,
}

impl<O> LoopState<O> {
    fn new(system_prompt: &str, input: String) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(input)],
            outcome: None,
            nudged: false,
            total_tokens: 0,
            usage: Vec::new(),
            evidence: BTreeMap::new(),
            directives: Vec::new(),
        }
    }

    fn has_directive(&self, kind: DirectiveKind) -> bool {
        self.directives.contains(&kind)
    }

    fn inject(&mut self, kind: DirectiveKind, content: String) {
        info!(directive = ?kind, total_tokens = self.total_tokens, "Injecting directive");
        self.messages.push(Message::directive(kind, content));
        self.directives.push(kind);
    }

    fn finish(self, termination: TerminationReason) -> LoopResult<O> {
        let llm_calls = self.usage.len();
        LoopResult {
            outcome: self.outcome,
            termination,
            messages: self.messages,
            usage: self.usage,
            total_tokens: self.total_tokens,
            llm_calls,
            evidence: self.evidence,
            directives: self.directives,
        }
    }
}

/// How a response is handled.
enum Route {
    Tools,
    Nudge,
    End,
}

fn route<O>(response: &ReasoningResponse, state: &LoopState<O>) -> Route {
    if !response.tool_calls.is_empty() {
        Route::Tools
    } else if !state.nudged {
        Route::Nudge
    } else {
        Route::End
    }
}

fn tool_error(message: &str) -> String {
    json!({ "error": message }).to_string()
}

fn is_error_body(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| value.get("error").map(|error| !error.is_null()))
        .unwrap_or(false)
}

pub struct ReasoningLoop<'a> {
    service: &'a dyn ReasoningService,
    tools: &'a dyn ToolProvider,
    registry: &'a ToolRegistry,
    settings: LoopSettings,
}

impl<'a> ReasoningLoop<'a> {
    pub fn new(
        service: &'a dyn ReasoningService,
        tools: &'a dyn ToolProvider,
        registry: &'a ToolRegistry,
        settings: LoopSettings,
    ) -> Self {
        Self {
            service,
            tools,
            registry,
            settings,
        }
    }

    /// Runs the loop until an outcome is submitted or a limit is hit.
    ///
    /// The deadline is checked between steps; a call in flight is never
    /// interrupted.
    pub async fn run<O: StructuredOutcome>(
        &self,
        system_prompt: &str,
        input: String,
        deadline: Instant,
    ) -> Result<LoopResult<O>, AgentError> {
        let mut state = LoopState::<O>::new(system_prompt, input);
        let definitions = self.registry.definitions();

        for step in 1..=self.settings.max_steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(step, "Deadline passed before step");
                return Ok(state.finish(TerminationReason::DeadlineExceeded));
            }
            if remaining < self.settings.deadline_buffer
                && !state.has_directive(DirectiveKind::Deadline)
            {
                state.inject(DirectiveKind::Deadline, deadline_directive::<O>());
            }
            if state.total_tokens > self.settings.token_budget
                && !state.has_directive(DirectiveKind::Budget)
            {
                state.inject(DirectiveKind::Budget, budget_directive::<O>());
            }

            debug!(step, messages = state.messages.len(), "Invoking reasoning service");
            let response = self
                .service
                .invoke(&state.messages, &definitions)
                .await
                .map_err(|e| classify(&e))?;

            state.usage.push(response.usage);
            state.total_tokens += response.usage.total_tokens;
            let route = route(&response, &state);
            state.messages.push(Message::Assistant {
                content: response.content,
                tool_calls: response.tool_calls.clone(),
            });

            match route {
                Route::Tools => {
                    self.execute_tools(&response.tool_calls, &mut state).await?;
                    if state.outcome.is_some() {
                        info!(step, total_tokens = state.total_tokens, "Outcome submitted");
                        return Ok(state.finish(TerminationReason::Submitted));
                    }
                }
                Route::Nudge => {
                    state.nudged = true;
                    state.inject(DirectiveKind::Nudge, nudge_directive::<O>());
                }
                Route::End => {
                    info!(step, "No outcome after nudge");
                    return Ok(state.finish(TerminationReason::NoOutcome));
                }
            }
        }

        warn!(max_steps = self.settings.max_steps, "Step limit reached");
        Ok(state.finish(TerminationReason::StepLimit))
    }

    /// Executes evidence calls, then parses the submission if there is one.
    async fn execute_tools<O: StructuredOutcome>(
        &self,
        calls: &[ToolCall],
        state: &mut LoopState<O>,
    ) -> Result<(), AgentError> {
        let submit_tool = self.registry.submit_tool();

        for call in calls.iter().filter(|call| call.name != submit_tool) {
            let content = self.execute_tool(call, state).await?;
            state.messages.push(Message::Tool {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
            });
        }

        if let Some(call) = calls.iter().find(|call| call.name == submit_tool) {
            match serde_json::from_value::<O>(call.arguments.clone()) {
                Ok(outcome) => state.outcome = Some(outcome),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Invalid submission");
                    state.messages.push(Message::Tool {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: tool_error(&format!("Invalid submission: {e}")),
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute_tool<O>(
        &self,
        call: &ToolCall,
        state: &mut LoopState<O>,
    ) -> Result<String, AgentError> {
        let args = match self.registry.validate_args(&call.name, &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Rejected tool arguments");
                return Ok(tool_error(&e));
            }
        };

        debug!(tool = %call.name, "Calling tool");
        let raw = self
            .tools
            .call_tool(&call.name, &args)
            .await
            .map_err(|e| classify(&e))?;
        let raw = if raw.trim().is_empty() {
            EMPTY_RESPONSE_ERROR.to_string()
        } else {
            raw
        };
        if is_error_body(&raw) {
            return Ok(raw);
        }

        match self.registry.validate_response(&call.name, &raw) {
            Ok(data) => {
                state.evidence.insert(call.name.clone(), data);
                Ok(raw)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Rejected tool response");
                Ok(tool_error(&e))
            }
        }
    }
}

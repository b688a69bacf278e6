use super::*;
use crate::testing::{ScriptedReasoner, StaticToolProvider, sample_diagnosis};
use serde_json::json;
use warden_proto::tools::{GET_IAM_STATE, GET_RECENT_LOGS};
use warden_proto::{Diagnosis, ErrorCategory, ServiceError};

const LOGS: &str = r#"{"log_group": "/aws/lambda/X", "events": [{"timestamp": "T1", "message": "AccessDenied"}]}"#;

fn settings() -> LoopSettings {
    LoopSettings {
        max_steps: 6,
        token_budget: 100_000,
        deadline_buffer: Duration::from_secs(90),
    }
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(300)
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

fn submit() -> ReasoningResponse {
    ReasoningResponse::calls(vec![call(
        "s",
        "submit_diagnosis",
        serde_json::to_value(sample_diagnosis()).unwrap(),
    )])
}

fn logs_call() -> ReasoningResponse {
    ReasoningResponse::calls(vec![call("c1", GET_RECENT_LOGS, json!({"lambda_name": "X"}))])
}

async fn run(
    reasoner: &ScriptedReasoner,
    tools: &StaticToolProvider,
    settings: LoopSettings,
    deadline: Instant,
) -> Result<LoopResult<Diagnosis>, AgentError> {
    let registry = ToolRegistry::intake();
    ReasoningLoop::new(reasoner, tools, &registry, settings)
        .run::<Diagnosis>("system", "investigate".to_string(), deadline)
        .await
}

fn tool_contents(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_immediate_submission() {
    let reasoner = ScriptedReasoner::new().then(submit());
    let result = run(&reasoner, &StaticToolProvider::new(), settings(), far_deadline())
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::Submitted);
    assert_eq!(result.outcome, Some(sample_diagnosis()));
    assert_eq!(result.llm_calls, 1);
}

#[tokio::test]
async fn test_tool_then_submit_collects_evidence() {
    let reasoner = ScriptedReasoner::new().then(logs_call()).then(submit());
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS);

    let result = run(&reasoner, &tools, settings(), far_deadline()).await.unwrap();

    assert!(result.termination.is_success());
    assert_eq!(result.llm_calls, 2);
    assert_eq!(result.evidence[GET_RECENT_LOGS]["events"][0]["message"], "AccessDenied");
    assert_eq!(tool_contents(&result.messages), vec![LOGS.to_string()]);
    assert_eq!(tools.calls(), vec![(GET_RECENT_LOGS.to_string(), json!({"lambda_name": "X"}))]);

    // The second request carries the tool result.
    let second = &reasoner.calls()[1];
    assert!(matches!(second.last(), Some(Message::Tool { name, .. }) if name == GET_RECENT_LOGS));
}

#[tokio::test]
async fn test_nudge_then_submit() {
    let reasoner = ScriptedReasoner::new()
        .then(ReasoningResponse::text("I think it is a permission problem."))
        .then(submit());

    let result = run(&reasoner, &StaticToolProvider::new(), settings(), far_deadline())
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::Submitted);
    assert_eq!(result.directives, vec![DirectiveKind::Nudge]);
    let nudge = reasoner.calls()[1].last().cloned();
    assert!(matches!(
        nudge,
        Some(Message::Directive { kind: DirectiveKind::Nudge, ref content }) if content.contains("submit_diagnosis")
    ));
}

#[tokio::test]
async fn test_text_after_nudge_ends_without_outcome() {
    let reasoner = ScriptedReasoner::repeating(ReasoningResponse::text("still thinking"));

    let result = run(&reasoner, &StaticToolProvider::new(), settings(), far_deadline())
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::NoOutcome);
    assert!(result.outcome.is_none());
    assert_eq!(reasoner.call_count(), 2);
}

#[tokio::test]
async fn test_step_limit_bounds_loop() {
    let reasoner = ScriptedReasoner::repeating(logs_call());
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS);
    let limited = LoopSettings {
        max_steps: 3,
        ..settings()
    };

    let result = run(&reasoner, &tools, limited, far_deadline()).await.unwrap();

    assert_eq!(result.termination, TerminationReason::StepLimit);
    assert_eq!(reasoner.call_count(), 3);
    assert_eq!(tools.calls().len(), 3);
}

// ─────────────────────────────────────────────────────────────────────────
// Validation feedback
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_arguments_fed_back() {
    let reasoner = ScriptedReasoner::new()
        .then(ReasoningResponse::calls(vec![call("c1", GET_RECENT_LOGS, json!({"fn": "X"}))]))
        .then(submit());
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS);

    let result = run(&reasoner, &tools, settings(), far_deadline()).await.unwrap();

    assert!(result.termination.is_success());
    assert!(tools.calls().is_empty());
    let contents = tool_contents(&result.messages);
    assert_eq!(contents.len(), 1);
    let body: Value = serde_json::from_str(&contents[0]).unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid arguments:"));
}

#[tokio::test]
async fn test_malformed_response_fed_back() {
    let reasoner = ScriptedReasoner::new().then(logs_call()).then(submit());
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, r#"{"rows": []}"#);

    let result = run(&reasoner, &tools, settings(), far_deadline()).await.unwrap();

    assert!(result.evidence.is_empty());
    let body: Value = serde_json::from_str(&tool_contents(&result.messages)[0]).unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Response validation failed:"));
}

#[tokio::test]
async fn test_empty_response_becomes_canonical_error() {
    let reasoner = ScriptedReasoner::new()
        .then(ReasoningResponse::calls(vec![call("c1", GET_IAM_STATE, json!({"lambda_name": "X"}))]))
        .then(submit());
    let tools = StaticToolProvider::new().with_response(GET_IAM_STATE, "");

    let result = run(&reasoner, &tools, settings(), far_deadline()).await.unwrap();

    assert_eq!(tool_contents(&result.messages), vec![EMPTY_RESPONSE_ERROR.to_string()]);
    assert!(result.evidence.is_empty());
}

#[tokio::test]
async fn test_invalid_submission_fed_back() {
    let reasoner = ScriptedReasoner::new()
        .then(ReasoningResponse::calls(vec![call(
            "s0",
            "submit_diagnosis",
            json!({"root_cause": "incomplete"}),
        )]))
        .then(submit());

    let result = run(&reasoner, &StaticToolProvider::new(), settings(), far_deadline())
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::Submitted);
    assert_eq!(result.llm_calls, 2);
    let contents = tool_contents(&result.messages);
    assert!(contents[0].contains("Invalid submission"), "{}", contents[0]);
}

// ─────────────────────────────────────────────────────────────────────────
// Budgets
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_budget_directive_after_total_exceeds_budget() {
    let usage = TokenUsage::new(500, 100);
    let reasoner = ScriptedReasoner::new()
        .then(logs_call().with_usage(usage))
        .then(logs_call().with_usage(usage))
        .then(submit().with_usage(usage));
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS);
    let tight = LoopSettings {
        token_budget: 1000,
        ..settings()
    };

    let result = run(&reasoner, &tools, tight, far_deadline()).await.unwrap();

    assert_eq!(result.total_tokens, 1800);
    assert_eq!(result.usage, vec![usage; 3]);
    assert_eq!(result.directives, vec![DirectiveKind::Budget]);
    let has_budget = |messages: &Vec<Message>| {
        messages
            .iter()
            .any(|m| matches!(m, Message::Directive { kind: DirectiveKind::Budget, .. }))
    };
    let calls = reasoner.calls();
    assert!(!has_budget(&calls[1]));
    assert!(has_budget(&calls[2]));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_directive_inside_buffer() {
    let reasoner = ScriptedReasoner::new().then(logs_call()).then(submit());
    let tools = StaticToolProvider::new().with_response(GET_RECENT_LOGS, LOGS);
    let deadline = Instant::now() + Duration::from_secs(60);

    let result = run(&reasoner, &tools, settings(), deadline).await.unwrap();

    assert!(result.termination.is_success());
    assert_eq!(result.directives, vec![DirectiveKind::Deadline]);
    let first = &reasoner.calls()[0];
    assert!(matches!(
        first.last(),
        Some(Message::Directive { kind: DirectiveKind::Deadline, content }) if content.contains("diagnosis")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_passed_deadline_stops_before_calling() {
    let reasoner = ScriptedReasoner::new().then(submit());

    let result = run(&reasoner, &StaticToolProvider::new(), settings(), Instant::now())
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::DeadlineExceeded);
    assert_eq!(reasoner.call_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_service_error_is_classified() {
    let reasoner =
        ScriptedReasoner::new().then_fail(ServiceError::api("AccessDeniedException", "no"));

    let err = run(&reasoner, &StaticToolProvider::new(), settings(), far_deadline())
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Auth);
}

#[tokio::test]
async fn test_tool_transport_error_propagates() {
    let reasoner = ScriptedReasoner::new().then(logs_call()).then(submit());
    let tools = StaticToolProvider::new()
        .with_failure(GET_RECENT_LOGS, ServiceError::Connection("reset".into()));

    let err = run(&reasoner, &tools, settings(), far_deadline()).await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::Connectivity);
    assert_eq!(reasoner.call_count(), 1);
}

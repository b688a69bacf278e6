//! Evidence bundle and token-budget truncation.
//!
//! The bundle is reduced by ordered passes until its estimate fits the
//! budget or the passes run out:
//!
//! 1. drop the oldest log events, one at a time
//! 2. collapse inline policy documents to their statement ids
//! 3. drop the workload configuration entirely
//!
//! Every pass only ever shrinks the bundle. A pass that would make a value
//! larger leaves it alone.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;
use warden_proto::tools::{GET_IAM_STATE, GET_LAMBDA_CONFIG, GET_RECENT_LOGS};

/// Rough token estimate: serialized JSON length divided by four.
pub fn estimate_tokens<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_string(value).map_or(0, |s| s.len() / 4)
}

/// The triggering event plus the last response of each evidence tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub event: Value,
    pub tools: BTreeMap<String, Value>,
}

impl EvidenceBundle {
    pub fn new(event: Value, tools: BTreeMap<String, Value>) -> Self {
        Self { event, tools }
    }

    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(self)
    }

    /// Per-tool token estimates.
    pub fn tool_sizes(&self) -> BTreeMap<String, usize> {
        self.tools
            .iter()
            .map(|(name, value)| (name.clone(), estimate_tokens(value)))
            .collect()
    }
}

/// What the truncation passes changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TruncationReport {
    /// True when the budget was zero or negative and nothing was attempted.
    pub skipped: bool,
    /// Per-tool change records, keyed by tool name.
    pub details: BTreeMap<String, Value>,
}

impl TruncationReport {
    pub fn changed(&self) -> bool {
        !self.details.is_empty()
    }
}

/// Size accounting stored alongside the evidence bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub raw_tokens_total: usize,
    pub final_tokens: usize,
    pub token_budget: i64,
    pub truncated: bool,
    pub truncation_details: BTreeMap<String, Value>,
}

impl ContextMetrics {
    pub fn compute(
        raw_sizes: &BTreeMap<String, usize>,
        token_budget: i64,
        final_tokens: usize,
        report: &TruncationReport,
    ) -> Self {
        Self {
            raw_tokens_total: raw_sizes.values().sum(),
            final_tokens,
            token_budget,
            truncated: !report.skipped && report.changed(),
            truncation_details: report.details.clone(),
        }
    }
}

fn json_len(value: &Value) -> usize {
    serde_json::to_string(value).map_or(0, |s| s.len())
}

fn over_budget(bundle: &EvidenceBundle, budget: usize) -> bool {
    bundle.estimate_tokens() > budget
}

/// Reduces `bundle` in place until it fits `budget` or every pass has run.
pub fn truncate_to_budget(bundle: &mut EvidenceBundle, budget: i64) -> TruncationReport {
    let mut report = TruncationReport::default();
    let Ok(budget) = usize::try_from(budget) else {
        report.skipped = true;
        return report;
    };
    if budget == 0 {
        report.skipped = true;
        return report;
    }

    let passes: [fn(&mut EvidenceBundle, usize) -> Option<(String, Value)>; 3] =
        [drop_oldest_logs, trim_policies_to_sids, drop_least_essential];
    for pass in passes {
        if !over_budget(bundle, budget) {
            break;
        }
        if let Some((tool, detail)) = pass(bundle, budget) {
            debug!(tool = %tool, detail = %detail, "Truncation pass applied");
            report.details.insert(tool, detail);
        }
    }
    report
}

fn drop_oldest_logs(bundle: &mut EvidenceBundle, budget: usize) -> Option<(String, Value)> {
    let mut dropped = 0usize;
    loop {
        if !over_budget(bundle, budget) {
            break;
        }
        let events = bundle
            .tools
            .get_mut(GET_RECENT_LOGS)
            .and_then(|logs| logs.get_mut("events"))
            .and_then(Value::as_array_mut)?;
        if events.is_empty() {
            break;
        }
        events.remove(0);
        dropped += 1;
    }
    (dropped > 0).then(|| (GET_RECENT_LOGS.to_string(), json!({ "events_dropped": dropped })))
}

fn statement_sids(policy: &Value) -> Option<Value> {
    let statements = policy.get("Statement")?;
    let statements = match statements {
        Value::Array(items) => items.clone(),
        single @ Value::Object(_) => vec![single.clone()],
        _ => return None,
    };
    let sids: Vec<Value> = statements
        .iter()
        .map(|stmt| {
            stmt.get("Sid")
                .and_then(Value::as_str)
                .unwrap_or("unnamed")
                .into()
        })
        .collect();
    Some(json!({ "StatementSids": sids }))
}

fn trim_policies_to_sids(bundle: &mut EvidenceBundle, _budget: usize) -> Option<(String, Value)> {
    let policies = bundle
        .tools
        .get_mut(GET_IAM_STATE)
        .and_then(|state| state.get_mut("inline_policies"))
        .and_then(Value::as_object_mut)?;

    let mut trimmed = 0usize;
    for policy in policies.values_mut() {
        let Some(collapsed) = statement_sids(policy) else {
            continue;
        };
        if json_len(&collapsed) <= json_len(policy) && collapsed != *policy {
            *policy = collapsed;
            trimmed += 1;
        }
    }
    (trimmed > 0).then(|| {
        (
            GET_IAM_STATE.to_string(),
            json!({ "trimmed": true, "policies_trimmed": trimmed }),
        )
    })
}

fn drop_least_essential(bundle: &mut EvidenceBundle, _budget: usize) -> Option<(String, Value)> {
    let config = bundle.tools.get_mut(GET_LAMBDA_CONFIG)?;
    let placeholder = json!({ "dropped": true });
    if *config == placeholder || json_len(&placeholder) > json_len(config) {
        return None;
    }
    *config = placeholder;
    Some((GET_LAMBDA_CONFIG.to_string(), json!({ "dropped": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(n: usize, width: usize) -> Value {
        let events: Vec<Value> = (0..n)
            .map(|i| json!({"timestamp": i.to_string(), "message": "x".repeat(width)}))
            .collect();
        json!({"log_group": "/aws/lambda/fn", "events": events})
    }

    fn bundle(tools: Vec<(&str, Value)>) -> EvidenceBundle {
        EvidenceBundle::new(
            json!({"lambda_name": "fn", "timestamp": "T1"}),
            tools
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&json!({})), 0);
        // {"a":"bbbb"} is 12 bytes
        assert_eq!(estimate_tokens(&json!({"a": "bbbb"})), 3);
    }

    #[test]
    fn test_zero_or_negative_budget_skips() {
        let mut b = bundle(vec![(GET_RECENT_LOGS, logs(20, 100))]);
        let before = b.clone();

        let report = truncate_to_budget(&mut b, 0);
        assert!(report.skipped);
        assert_eq!(b, before);

        let report = truncate_to_budget(&mut b, -5);
        assert!(report.skipped);
        assert_eq!(b, before);
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let mut b = bundle(vec![(GET_RECENT_LOGS, logs(1, 2))]);
        let before = b.clone();
        let report = truncate_to_budget(&mut b, 999_999);
        assert!(!report.changed());
        assert_eq!(b, before);
    }

    #[test]
    fn test_drops_oldest_logs_first() {
        let mut b = bundle(vec![(GET_RECENT_LOGS, logs(20, 100))]);
        let report = truncate_to_budget(&mut b, 200);

        let events = b.tools[GET_RECENT_LOGS]["events"].as_array().unwrap();
        assert!(events.len() < 20);
        // Newest entries survive.
        assert_eq!(events.last().unwrap()["timestamp"], "19");
        assert!(report.details[GET_RECENT_LOGS]["events_dropped"].as_u64().unwrap() > 0);
        assert!(b.estimate_tokens() <= 200);
    }

    #[test]
    fn test_drains_all_events_when_needed() {
        let mut b = bundle(vec![(GET_RECENT_LOGS, logs(5, 200))]);
        let report = truncate_to_budget(&mut b, 1);
        assert!(b.tools[GET_RECENT_LOGS]["events"].as_array().unwrap().is_empty());
        assert_eq!(report.details[GET_RECENT_LOGS]["events_dropped"], 5);
    }

    #[test]
    fn test_collapses_policies_to_sids() {
        let iam = json!({
            "role_name": "fn-role",
            "inline_policies": {
                "s3": {"Statement": [{"Sid": "ReadBucket", "Effect": "Allow", "Resource": "*".repeat(200)}]},
                "logs": {"Statement": [{"Effect": "Allow", "Action": "logs:*", "Resource": "*".repeat(200)}]},
            },
            "attached_policies": []
        });
        let mut b = bundle(vec![(GET_IAM_STATE, iam)]);
        let report = truncate_to_budget(&mut b, 1);

        let policies = &b.tools[GET_IAM_STATE]["inline_policies"];
        assert_eq!(policies["s3"], json!({"StatementSids": ["ReadBucket"]}));
        assert_eq!(policies["logs"], json!({"StatementSids": ["unnamed"]}));
        assert_eq!(report.details[GET_IAM_STATE]["trimmed"], true);
    }

    #[test]
    fn test_policy_without_statement_is_left_alone() {
        let iam = json!({
            "inline_policies": {"p": {"Version": "2012-10-17"}},
        });
        let mut b = bundle(vec![(GET_IAM_STATE, iam.clone())]);
        let report = truncate_to_budget(&mut b, 1);
        assert_eq!(b.tools[GET_IAM_STATE], iam);
        assert!(!report.details.contains_key(GET_IAM_STATE));
    }

    #[test]
    fn test_passes_run_in_order() {
        let mut b = bundle(vec![
            (GET_RECENT_LOGS, logs(20, 200)),
            (
                GET_IAM_STATE,
                json!({"inline_policies": {"p": {"Statement": [{"Sid": "s", "Effect": "Allow", "Resource": "*".repeat(100)}]}}}),
            ),
            (GET_LAMBDA_CONFIG, json!({"FunctionName": "fn", "big": "y".repeat(500)})),
        ]);
        let report = truncate_to_budget(&mut b, 1);

        assert!(report.details.contains_key(GET_RECENT_LOGS));
        assert!(report.details.contains_key(GET_IAM_STATE));
        assert_eq!(b.tools[GET_LAMBDA_CONFIG], json!({"dropped": true}));
    }

    #[test]
    fn test_stops_once_under_budget() {
        let mut b = bundle(vec![
            (GET_RECENT_LOGS, logs(20, 200)),
            (GET_LAMBDA_CONFIG, json!({"FunctionName": "fn"})),
        ]);
        let report = truncate_to_budget(&mut b, 500);
        assert!(report.details.contains_key(GET_RECENT_LOGS));
        assert!(!report.details.contains_key(GET_LAMBDA_CONFIG));
        assert_eq!(b.tools[GET_LAMBDA_CONFIG]["FunctionName"], "fn");
    }

    #[test]
    fn test_truncation_is_monotonic_and_idempotent() {
        let original = bundle(vec![
            (GET_RECENT_LOGS, logs(30, 120)),
            (
                GET_IAM_STATE,
                json!({"inline_policies": {"empty": {"Statement": [{}]}, "big": {"Statement": [{"Sid": "A", "Resource": "*".repeat(300)}]}}}),
            ),
            (GET_LAMBDA_CONFIG, json!({})),
        ]);

        for budget in [1_i64, 50, 400, 900, 5_000] {
            let mut b = original.clone();
            truncate_to_budget(&mut b, budget);
            assert!(b.estimate_tokens() <= original.estimate_tokens());

            let once = b.clone();
            let report = truncate_to_budget(&mut b, budget);
            assert_eq!(b, once, "second run changed the bundle at budget {budget}");
            assert!(!report.changed());
        }
    }

    #[test]
    fn test_metrics() {
        let sizes = BTreeMap::from([("logs".to_string(), 100), ("iam".to_string(), 50)]);
        let report = TruncationReport {
            skipped: false,
            details: BTreeMap::from([("logs".to_string(), json!({"events_dropped": 5}))]),
        };
        let metrics = ContextMetrics::compute(&sizes, 200, 120, &report);
        assert_eq!(metrics.raw_tokens_total, 150);
        assert_eq!(metrics.final_tokens, 120);
        assert!(metrics.truncated);

        let untouched = ContextMetrics::compute(&sizes, 0, 150, &TruncationReport::default());
        assert!(!untouched.truncated);
    }
}

//! JEXL expression middleware for Snapflow.
//!
//! Resolves `{{ ... }}` placeholders in node input against a flattened view
//! of the execution history before the executor runs, and resolves
//! expression-bearing retry policy fields into concrete values so the error
//! path reads numbers instead of opaque strings.
//!
//! The flattened expression context looks like:
//!
//! ```json
//! {
//!   "nodes": {
//!     "gather": {
//!       "output": { "count": 3 },
//!       "last": { "data": { "count": 3 }, "timestamp": 1700000000000, "error": null },
//!       "all": [ { "data": ..., "timestamp": ..., "error": ... } ]
//!     }
//!   },
//!   "input": <external payload>,
//!   "globals": <engine globals>
//! }
//! ```
//!
//! A string that is one placeholder end to end resolves to the expression's
//! typed value; placeholders embedded in a larger string are stringified and
//! concatenated. An expression that fails to evaluate resolves to `null`
//! (with a warning) rather than failing the step.

use serde_json::{Map, Value, json};

use snapflow_core::middleware::{Middleware, MiddlewareFuture, Next, StepContext};
use snapflow_types::workflow::{BackoffStrategy, BackoffValue, PolicyValue, RetryPolicy};

// ---------------------------------------------------------------------------
// JexlMiddleware
// ---------------------------------------------------------------------------

/// Middleware resolving JEXL placeholders in node input and retry policies.
#[derive(Debug, Default)]
pub struct JexlMiddleware;

impl JexlMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for JexlMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut StepContext, next: Next<'a>) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            resolve_step(ctx);
            next.run(ctx).await
        })
    }
}

/// Resolve the step's input and retry policy in place. Synchronous: the
/// evaluator lives only for this call and is never held across an await.
fn resolve_step(ctx: &mut StepContext) {
    let evaluator = build_evaluator();
    let flat = flatten(ctx);

    let input = std::mem::take(&mut ctx.input);
    ctx.input = resolve_value(&evaluator, input, &flat);

    if let Some(policy) = ctx.definition_retry_policy.clone() {
        ctx.state.retry_policy = Some(resolve_policy(&evaluator, policy, &flat));
    }
}

/// Evaluator with the standard transforms registered.
fn build_evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.len(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

// ---------------------------------------------------------------------------
// Context flattening
// ---------------------------------------------------------------------------

/// Expression context: per-node history under `nodes`, the external payload
/// under `input`, engine globals under `globals`.
fn flatten(ctx: &StepContext) -> Value {
    let mut nodes = Map::new();
    for (node_id, results) in ctx.snapshot.context.iter() {
        let Some(last) = results.last() else { continue };
        let history: Vec<Value> = results
            .iter()
            .map(|r| json!({ "data": r.output, "timestamp": r.timestamp, "error": r.error }))
            .collect();
        nodes.insert(
            node_id.to_string(),
            json!({
                "output": last.output,
                "last": { "data": last.output, "timestamp": last.timestamp, "error": last.error },
                "all": history,
            }),
        );
    }
    json!({
        "nodes": nodes,
        "input": ctx.external_payload.clone().unwrap_or(Value::Null),
        "globals": ctx.globals.clone().unwrap_or(Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Value resolution
// ---------------------------------------------------------------------------

fn resolve_value(evaluator: &jexl_eval::Evaluator<'_>, value: Value, flat: &Value) -> Value {
    match value {
        Value::String(s) => resolve_string(evaluator, s, flat),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_value(evaluator, item, flat))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, resolve_value(evaluator, item, flat)))
                .collect(),
        ),
        other => other,
    }
}

fn resolve_string(evaluator: &jexl_eval::Evaluator<'_>, s: String, flat: &Value) -> Value {
    if !s.contains("{{") {
        return Value::String(s);
    }

    // A single placeholder spanning the whole string keeps the expression's
    // typed value instead of stringifying it.
    if s.len() > 4 && s.starts_with("{{") && s.ends_with("}}") {
        return evaluate(evaluator, &s[2..s.len() - 2], flat);
    }

    let mut out = String::new();
    let mut rest = s.as_str();
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let body = &after[..end];
                if body.is_empty() {
                    // An empty placeholder holds no expression; keep it verbatim
                    out.push_str("{{}}");
                } else {
                    let result = evaluate(evaluator, body, flat);
                    out.push_str(&stringify(&result));
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder: keep the text verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

fn evaluate(evaluator: &jexl_eval::Evaluator<'_>, expression: &str, flat: &Value) -> Value {
    match evaluator.eval_in_context(expression.trim(), flat) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(expression, "expression evaluation failed: {err}");
            Value::Null
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Retry policy resolution
// ---------------------------------------------------------------------------

fn resolve_policy(
    evaluator: &jexl_eval::Evaluator<'_>,
    policy: RetryPolicy,
    flat: &Value,
) -> RetryPolicy {
    RetryPolicy {
        max_attempts: resolve_policy_value(evaluator, policy.max_attempts, flat),
        interval: resolve_policy_value(evaluator, policy.interval, flat),
        backoff: resolve_backoff(evaluator, policy.backoff, flat),
    }
}

fn resolve_policy_value(
    evaluator: &jexl_eval::Evaluator<'_>,
    value: PolicyValue,
    flat: &Value,
) -> PolicyValue {
    match value {
        PolicyValue::Number(n) => PolicyValue::Number(n),
        PolicyValue::Expression(s) => match resolve_string(evaluator, s.clone(), flat) {
            Value::Number(n) => n
                .as_f64()
                .map(PolicyValue::Number)
                .unwrap_or(PolicyValue::Expression(s)),
            Value::String(text) => PolicyValue::Expression(text),
            // Evaluation failure or a non-numeric result stays opaque, which
            // the retry resolver reads as "no retry budget"
            _ => PolicyValue::Expression(s),
        },
    }
}

fn resolve_backoff(
    evaluator: &jexl_eval::Evaluator<'_>,
    backoff: BackoffValue,
    flat: &Value,
) -> BackoffValue {
    match backoff {
        BackoffValue::Strategy(s) => BackoffValue::Strategy(s),
        BackoffValue::Expression(s) => match resolve_string(evaluator, s.clone(), flat) {
            Value::String(text) => match text.trim() {
                "exponential" => BackoffValue::Strategy(BackoffStrategy::Exponential),
                "fixed" => BackoffValue::Strategy(BackoffStrategy::Fixed),
                _ => BackoffValue::Expression(text),
            },
            _ => BackoffValue::Expression(s),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use snapflow_core::engine::{ExecutionRequest, WorkflowEngine};
    use snapflow_core::node::{FnExecutor, NodeDefinition, NodeError, NodeOutcome, NodeRegistry};
    use snapflow_types::snapshot::RunStatus;
    use snapflow_types::workflow::{Edge, Node, WorkflowDefinition};

    fn node(id: &str, node_type: &str, data: Value) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            data,
            metadata: None,
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
        }
    }

    fn echo_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(
            "echo",
            NodeDefinition::new(FnExecutor(|input: Value, _: Option<Value>| async move {
                Ok(NodeOutcome::data(input))
            })),
        );
        registry
    }

    // -----------------------------------------------------------------------
    // String resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_plain_string_untouched() {
        let evaluator = build_evaluator();
        let flat = json!({});
        let result = resolve_string(&evaluator, "no placeholders here".to_string(), &flat);
        assert_eq!(result, json!("no placeholders here"));
    }

    #[test]
    fn test_full_placeholder_keeps_type() {
        let evaluator = build_evaluator();
        let flat = json!({ "nodes": { "a": { "output": { "age": 20 } } } });
        let result = resolve_string(
            &evaluator,
            "{{ nodes.a.output.age }}".to_string(),
            &flat,
        );
        assert_eq!(result.as_f64(), Some(20.0));
    }

    #[test]
    fn test_embedded_placeholder_stringifies() {
        let evaluator = build_evaluator();
        let flat = json!({ "input": { "name": "ada" } });
        let result = resolve_string(
            &evaluator,
            "hello {{ input.name }}!".to_string(),
            &flat,
        );
        assert_eq!(result, json!("hello ada!"));
    }

    #[test]
    fn test_invalid_expression_resolves_to_null() {
        let evaluator = build_evaluator();
        let flat = json!({});
        let result = resolve_string(&evaluator, "{{ 1 + }}".to_string(), &flat);
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_empty_placeholder_kept_verbatim() {
        let evaluator = build_evaluator();
        let flat = json!({});
        assert_eq!(
            resolve_string(&evaluator, "{{}}".to_string(), &flat),
            json!("{{}}")
        );
        assert_eq!(
            resolve_string(&evaluator, "a {{}} b".to_string(), &flat),
            json!("a {{}} b")
        );
    }

    #[test]
    fn test_nested_structures_resolved() {
        let evaluator = build_evaluator();
        let flat = json!({ "globals": { "env": "prod" } });
        let resolved = resolve_value(
            &evaluator,
            json!({
                "list": ["{{ globals.env }}", "static"],
                "nested": { "env": "{{ globals.env }}" },
                "untouched": 7
            }),
            &flat,
        );
        assert_eq!(
            resolved,
            json!({
                "list": ["prod", "static"],
                "nested": { "env": "prod" },
                "untouched": 7
            })
        );
    }

    // -----------------------------------------------------------------------
    // Engine integration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_input_resolved_against_prior_node_output() {
        let definition = WorkflowDefinition {
            nodes: vec![
                node("a", "echo", json!({ "age": 20 })),
                node("b", "echo", json!({ "doubled": "{{ nodes.a.last.data.age * 2 }}" })),
            ],
            edges: vec![edge("e1", "a", "b")],
        };
        let mut engine = WorkflowEngine::new(definition, echo_registry()).unwrap();
        engine.use_middleware(JexlMiddleware::new());

        let snapshot = engine.execute(ExecutionRequest::start("a")).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        let output = &snapshot.context.latest("b").unwrap().output;
        assert_eq!(output["doubled"].as_f64(), Some(40.0));
    }

    #[tokio::test]
    async fn test_external_payload_available_as_input() {
        let definition = WorkflowDefinition {
            nodes: vec![node("a", "echo", json!({ "greeting": "hi {{ input.name }}" }))],
            edges: vec![],
        };
        let mut engine = WorkflowEngine::new(definition, echo_registry()).unwrap();
        engine.use_middleware(JexlMiddleware::new());

        let snapshot = engine
            .execute(ExecutionRequest::start("a").with_payload(json!({ "name": "ada" })))
            .await
            .unwrap();
        assert_eq!(
            snapshot.context.latest("a").unwrap().output,
            json!({ "greeting": "hi ada" })
        );
    }

    #[tokio::test]
    async fn test_retry_policy_expression_resolved_from_globals() {
        let definition = WorkflowDefinition {
            nodes: vec![node("flaky", "always_fails", json!({}))],
            edges: vec![],
        };
        let mut registry = NodeRegistry::new();
        registry.register(
            "always_fails",
            NodeDefinition::new(FnExecutor(|_: Value, _: Option<Value>| async {
                Err::<NodeOutcome, NodeError>(NodeError::new("nope"))
            }))
            .with_retry_policy(RetryPolicy {
                max_attempts: PolicyValue::Expression("{{ globals.retries }}".to_string()),
                interval: PolicyValue::Number(10.0),
                backoff: BackoffValue::Strategy(BackoffStrategy::Fixed),
            }),
        );
        let mut engine = WorkflowEngine::new(definition, registry)
            .unwrap()
            .with_globals(json!({ "retries": 2 }));
        engine.use_middleware(JexlMiddleware::new());

        let first = engine.execute(ExecutionRequest::start("flaky")).await.unwrap();
        assert_eq!(first.status, RunStatus::Error);
        assert_eq!(first.metadata["pausedReason"], json!("Retry attempt 1/2"));

        let second = engine.execute(ExecutionRequest::resume(first)).await.unwrap();
        assert_eq!(second.status, RunStatus::Error);

        let third = engine.execute(ExecutionRequest::resume(second)).await.unwrap();
        assert_eq!(third.status, RunStatus::Failed);
        assert_eq!(third.context.results("flaky").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unresolvable_policy_means_no_retry() {
        let definition = WorkflowDefinition {
            nodes: vec![node("flaky", "always_fails", json!({}))],
            edges: vec![],
        };
        let mut registry = NodeRegistry::new();
        registry.register(
            "always_fails",
            NodeDefinition::new(FnExecutor(|_: Value, _: Option<Value>| async {
                Err::<NodeOutcome, NodeError>(NodeError::new("nope"))
            }))
            .with_retry_policy(RetryPolicy {
                max_attempts: PolicyValue::Expression("{{ globals.missing + }}".to_string()),
                interval: PolicyValue::Number(10.0),
                backoff: BackoffValue::Strategy(BackoffStrategy::Fixed),
            }),
        );
        let mut engine = WorkflowEngine::new(definition, registry).unwrap();
        engine.use_middleware(JexlMiddleware::new());

        let snapshot = engine.execute(ExecutionRequest::start("flaky")).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Failed);
    }
}

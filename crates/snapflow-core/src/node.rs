//! Node behavior contracts: executor trait, outcomes, and the type registry.
//!
//! `NodeExecutor` uses RPITIT, so it cannot be a trait object directly.
//! `BoxNodeExecutor` follows the usual pattern:
//! 1. Define an object-safe `NodeExecutorDyn` trait with boxed futures
//! 2. Blanket-impl `NodeExecutorDyn` for all `T: NodeExecutor`
//! 3. `BoxNodeExecutor` wraps `Box<dyn NodeExecutorDyn>` and delegates

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use snapflow_types::snapshot::Context;
use snapflow_types::workflow::RetryPolicy;

// ---------------------------------------------------------------------------
// NodeError / NodeOutcome
// ---------------------------------------------------------------------------

/// A node execution failure. Recoverable: the engine records it into the
/// snapshot and consults the retry policy rather than propagating it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct NodeError(String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// What a node executor produced: a result value plus routing intent.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// Output recorded into the snapshot context.
    pub data: Value,
    /// Branch label selecting the outgoing edge. `None` takes the
    /// unlabeled default edge.
    pub next_handle: Option<String>,
    /// Suspend the run instead of advancing. Nothing is recorded; the same
    /// node re-executes on resume.
    pub pause: bool,
}

impl NodeOutcome {
    /// Successful completion, taking the default branch.
    pub fn data(data: Value) -> Self {
        Self {
            data,
            next_handle: None,
            pause: false,
        }
    }

    /// Successful completion, taking the named branch.
    pub fn branch(data: Value, handle: impl Into<String>) -> Self {
        Self {
            data,
            next_handle: Some(handle.into()),
            pause: false,
        }
    }

    /// Suspend the run at this node.
    pub fn pause() -> Self {
        Self {
            data: Value::Null,
            next_handle: None,
            pause: true,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeExecutor
// ---------------------------------------------------------------------------

/// Business logic for one node type.
///
/// `input` is the node's static configuration after middleware resolution;
/// `context` is the full execution history. Executors must be idempotent-safe
/// under retry: the engine may re-invoke the same logical attempt if the
/// caller crashes between node completion and snapshot persistence.
pub trait NodeExecutor: Send + Sync {
    fn execute(
        &self,
        input: &Value,
        context: &Context,
        external_payload: Option<&Value>,
        globals: Option<&Value>,
    ) -> impl Future<Output = Result<NodeOutcome, NodeError>> + Send;
}

/// Object-safe version of [`NodeExecutor`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn NodeExecutorDyn`).
/// A blanket implementation is provided for all types implementing
/// `NodeExecutor`.
pub trait NodeExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a Value,
        context: &'a Context,
        external_payload: Option<&'a Value>,
        globals: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeError>> + Send + 'a>>;
}

/// Blanket implementation: any `NodeExecutor` automatically implements
/// `NodeExecutorDyn`.
impl<T: NodeExecutor> NodeExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a Value,
        context: &'a Context,
        external_payload: Option<&'a Value>,
        globals: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeError>> + Send + 'a>> {
        Box::pin(self.execute(input, context, external_payload, globals))
    }
}

/// Type-erased node executor, so a registry can hold heterogeneous node
/// behaviors behind one type.
pub struct BoxNodeExecutor {
    inner: Box<dyn NodeExecutorDyn>,
}

impl BoxNodeExecutor {
    /// Wrap a concrete `NodeExecutor` in a type-erased box.
    pub fn new<T: NodeExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        input: &Value,
        context: &Context,
        external_payload: Option<&Value>,
        globals: Option<&Value>,
    ) -> Result<NodeOutcome, NodeError> {
        self.inner
            .execute_boxed(input, context, external_payload, globals)
            .await
    }
}

// ---------------------------------------------------------------------------
// FnExecutor
// ---------------------------------------------------------------------------

/// Adapter turning a plain async closure into a [`NodeExecutor`].
///
/// The closure receives the resolved input and the external payload by value;
/// executors that need the full history implement the trait directly.
pub struct FnExecutor<F>(pub F);

impl<F, Fut> NodeExecutor for FnExecutor<F>
where
    F: Fn(Value, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutcome, NodeError>> + Send,
{
    fn execute(
        &self,
        input: &Value,
        _context: &Context,
        external_payload: Option<&Value>,
        _globals: Option<&Value>,
    ) -> impl Future<Output = Result<NodeOutcome, NodeError>> + Send {
        (self.0)(input.clone(), external_payload.cloned())
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition / NodeRegistry
// ---------------------------------------------------------------------------

/// The behavior contract for one node type: executor plus optional static
/// retry policy and metadata.
pub struct NodeDefinition {
    pub metadata: Option<Value>,
    pub retry_policy: Option<RetryPolicy>,
    pub executor: BoxNodeExecutor,
}

impl NodeDefinition {
    pub fn new<T: NodeExecutor + 'static>(executor: T) -> Self {
        Self {
            metadata: None,
            retry_policy: None,
            executor: BoxNodeExecutor::new(executor),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Read-only mapping from node type to definition, supplied at engine
/// construction and shared across all runs.
#[derive(Default)]
pub struct NodeRegistry {
    definitions: HashMap<String, NodeDefinition>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: impl Into<String>, definition: NodeDefinition) {
        self.definitions.insert(node_type.into(), definition);
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeDefinition> {
        self.definitions.get(node_type)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_box_executor_delegates() {
        let executor = BoxNodeExecutor::new(FnExecutor(|input: Value, _: Option<Value>| async move {
            Ok(NodeOutcome::data(json!({ "echo": input })))
        }));

        let context = Context::new();
        let outcome = executor
            .execute(&json!("hello"), &context, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.data, json!({ "echo": "hello" }));
        assert!(!outcome.pause);
        assert!(outcome.next_handle.is_none());
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(
            "noop",
            NodeDefinition::new(FnExecutor(|_: Value, _: Option<Value>| async {
                Ok(NodeOutcome::data(Value::Null))
            })),
        );

        assert!(registry.get("noop").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_outcome_constructors() {
        let branch = NodeOutcome::branch(json!(1), "yes");
        assert_eq!(branch.next_handle.as_deref(), Some("yes"));

        let pause = NodeOutcome::pause();
        assert!(pause.pause);
        assert_eq!(pause.data, Value::Null);
    }
}

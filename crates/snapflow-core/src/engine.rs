//! Execution driver: the public entry point.
//!
//! The engine holds only read-only configuration (graph, registry,
//! middlewares, globals); all mutable run state lives in the snapshot the
//! caller passes in and gets back. One engine instance may therefore drive
//! any number of concurrent runs. Convergence of two concurrent resumes of
//! the *same* snapshot is the caller's responsibility, via an optimistic
//! check on `Snapshot::version` at persist time.

use std::sync::Arc;

use serde_json::Value;

use snapflow_types::snapshot::{RunStatus, Snapshot, now_ms};
use snapflow_types::workflow::WorkflowDefinition;

use crate::error::EngineError;
use crate::graph::GraphIndex;
use crate::middleware::Middleware;
use crate::node::NodeRegistry;

/// Ceiling on automatic steps per `execute` call, protecting against
/// unbounded cycles in the graph.
pub const DEFAULT_STEP_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// ExecutionRequest
// ---------------------------------------------------------------------------

/// One call into the driver: start a fresh run or resume a snapshot.
///
/// Exactly one of `snapshot` and `initial_node_id` must be supplied.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Resume this snapshot.
    pub snapshot: Option<Snapshot>,
    /// Start a fresh run at this node.
    pub initial_node_id: Option<String>,
    /// Workflow id for a fresh run; generated when omitted.
    pub workflow_id: Option<String>,
    /// Payload delivered to the first step of this call only.
    pub external_payload: Option<Value>,
}

impl ExecutionRequest {
    /// Start a fresh run at `initial_node_id`.
    pub fn start(initial_node_id: impl Into<String>) -> Self {
        Self {
            initial_node_id: Some(initial_node_id.into()),
            ..Self::default()
        }
    }

    /// Resume an existing snapshot.
    pub fn resume(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.external_payload = Some(payload);
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Stateless workflow engine over one workflow definition.
pub struct WorkflowEngine {
    pub(crate) definition: WorkflowDefinition,
    pub(crate) registry: NodeRegistry,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) globals: Option<Value>,
    pub(crate) step_limit: u32,
}

impl WorkflowEngine {
    /// Build an engine over a definition and a node type registry. Validates
    /// the graph (unique node ids; duplicate branches are logged).
    pub fn new(definition: WorkflowDefinition, registry: NodeRegistry) -> Result<Self, EngineError> {
        GraphIndex::new(&definition)?;
        Ok(Self {
            definition,
            registry,
            middlewares: Vec::new(),
            globals: None,
            step_limit: DEFAULT_STEP_LIMIT,
        })
    }

    /// Engine-wide values exposed to middlewares and executors as `globals`.
    pub fn with_globals(mut self, globals: Value) -> Self {
        self.globals = Some(globals);
        self
    }

    pub fn with_step_limit(mut self, step_limit: u32) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Append a middleware to the chain. Middlewares run in registration
    /// order going in, reverse order coming out.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Check that every node type in the definition has a registered
    /// definition. Explicit entry point; `execute` resolves lazily and only
    /// fails when an unregistered node is actually reached.
    pub fn validate_workflow(&self) -> Result<(), EngineError> {
        for node in &self.definition.nodes {
            if self.registry.get(&node.node_type).is_none() {
                return Err(EngineError::DefinitionNotFound(node.node_type.clone()));
            }
        }
        Ok(())
    }

    /// Advance a run until it leaves the `active` state.
    ///
    /// Resuming a `paused` or `error` snapshot flips it back to `active`;
    /// resuming a terminal one returns it unchanged apart from timing. The
    /// caller-supplied payload reaches only the first step of this call, so
    /// one call can both deliver a resume payload and auto-advance through
    /// any immediately-following non-pausing nodes.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<Snapshot, EngineError> {
        let ExecutionRequest {
            snapshot,
            initial_node_id,
            workflow_id,
            external_payload,
        } = request;

        let mut snapshot = match (snapshot, initial_node_id) {
            (Some(mut snapshot), _) => {
                if snapshot.status.is_suspended() {
                    snapshot.status = RunStatus::Active;
                }
                snapshot.last_started_at = now_ms();
                snapshot
            }
            (None, Some(start)) => {
                let workflow_id =
                    workflow_id.unwrap_or_else(|| format!("workflow-{}", now_ms()));
                Snapshot::initial(workflow_id, start)
            }
            (None, None) => return Err(EngineError::MissingStart),
        };

        tracing::info!(
            workflow_id = %snapshot.workflow_id,
            status = ?snapshot.status,
            version = snapshot.version,
            "starting execution"
        );

        let graph = GraphIndex::new(&self.definition)?;
        let mut payload = external_payload;
        let mut steps = 0u32;

        while snapshot.status == RunStatus::Active {
            if steps >= self.step_limit {
                tracing::error!(
                    workflow_id = %snapshot.workflow_id,
                    limit = self.step_limit,
                    "step limit exceeded, aborting run"
                );
                snapshot.status = RunStatus::Failed;
                snapshot.metadata.insert(
                    "failedReason".to_string(),
                    Value::String("Step limit exceeded".to_string()),
                );
                break;
            }
            snapshot = self.execute_step(&graph, snapshot, payload.take()).await?;
            steps += 1;
        }

        tracing::info!(
            workflow_id = %snapshot.workflow_id,
            status = ?snapshot.status,
            version = snapshot.version,
            steps,
            "execution suspended or finished"
        );
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Step executor: advance a snapshot by exactly one node.
//!
//! Every transition builds a new snapshot by structural copy. Success appends
//! a result and bumps `version`; pause changes only timing; failure takes the
//! retry path. Missing nodes or definitions are structural errors and
//! propagate out of the whole call instead of failing the snapshot.

use serde_json::Value;

use snapflow_types::snapshot::{NodeResult, RetryState, RunStatus, Snapshot, now_ms};

use crate::engine::WorkflowEngine;
use crate::error::EngineError;
use crate::graph::GraphIndex;
use crate::middleware::{StepContext, StepState, run_pipeline};
use crate::node::{NodeDefinition, NodeError};
use crate::retry::{self, RetryDecision};

impl WorkflowEngine {
    /// Run the middleware pipeline and node executor for the snapshot's
    /// current node, producing the successor snapshot.
    pub(crate) async fn execute_step(
        &self,
        graph: &GraphIndex<'_>,
        snapshot: Snapshot,
        external_payload: Option<Value>,
    ) -> Result<Snapshot, EngineError> {
        let now = now_ms();
        let mut snapshot = snapshot;
        snapshot.total_execution_time += now - snapshot.last_started_at;
        snapshot.last_started_at = now;

        // No outgoing edge matched on the previous step: the run is complete.
        let Some(current_id) = snapshot.current_node_id.clone() else {
            snapshot.status = RunStatus::Completed;
            return Ok(snapshot);
        };

        let node = graph
            .node(&current_id)
            .ok_or_else(|| EngineError::NodeNotFound(current_id.clone()))?;
        let definition = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| EngineError::DefinitionNotFound(node.node_type.clone()))?;

        tracing::debug!(
            workflow_id = %snapshot.workflow_id,
            node_id = %current_id,
            node_type = %node.node_type,
            "executing node"
        );

        let mut ctx = StepContext {
            node: node.clone(),
            definition_metadata: definition.metadata.clone(),
            definition_retry_policy: definition.retry_policy.clone(),
            snapshot: snapshot.clone(),
            globals: self.globals.clone(),
            external_payload,
            input: node.data.clone(),
            output: None,
            error: None,
            state: StepState::default(),
        };

        match run_pipeline(&self.middlewares, &definition.executor, &mut ctx).await {
            Ok(()) => {
                if ctx.state.pause {
                    // Suspend: no context append, no version bump; the same
                    // node re-executes on resume.
                    snapshot.status = RunStatus::Paused;
                    return Ok(snapshot);
                }

                let attempt = retry::continuation_attempt(snapshot.retry_state.as_ref(), &current_id);
                snapshot.context.push(
                    &current_id,
                    NodeResult {
                        output: ctx.output.unwrap_or(Value::Null),
                        timestamp: now_ms(),
                        error: None,
                        attempt,
                    },
                );

                let next_id = graph
                    .next_node_id(&current_id, ctx.state.next_handle.as_deref())
                    .map(str::to_string);
                snapshot.status = if next_id.is_some() {
                    RunStatus::Active
                } else {
                    RunStatus::Completed
                };
                snapshot.current_node_id = next_id;
                snapshot.version += 1;
                snapshot.retry_state = None;
                Ok(snapshot)
            }
            Err(err) => Ok(self.handle_node_failure(snapshot, &current_id, definition, &ctx, err)),
        }
    }

    /// Route a node failure through the retry resolver. The recorded message
    /// prefers an explicit `ctx.error` set by a middleware over the
    /// propagated error itself.
    fn handle_node_failure(
        &self,
        mut snapshot: Snapshot,
        node_id: &str,
        definition: &NodeDefinition,
        ctx: &StepContext,
        err: NodeError,
    ) -> Snapshot {
        let message = ctx.error.clone().unwrap_or_else(|| err.to_string());
        let policy = ctx
            .state
            .retry_policy
            .as_ref()
            .or(definition.retry_policy.as_ref());
        let now = now_ms();

        match retry::resolve(policy, snapshot.retry_state.as_ref(), node_id) {
            RetryDecision::Retry {
                attempt,
                max_attempts,
                delay_ms,
            } => {
                tracing::warn!(node_id, attempt, delay_ms, "node failed, retry scheduled: {message}");
                snapshot.context.push(
                    node_id,
                    NodeResult {
                        output: Value::Null,
                        timestamp: now,
                        error: Some(message),
                        attempt,
                    },
                );
                snapshot.status = RunStatus::Error;
                snapshot.retry_state = Some(RetryState {
                    node_id: node_id.to_string(),
                    attempts: attempt,
                    next_retry_at: Some(now + delay_ms),
                });
                snapshot.metadata.insert(
                    "pausedReason".to_string(),
                    Value::String(format!("Retry attempt {attempt}/{max_attempts}")),
                );
            }
            RetryDecision::Fail { attempt } => {
                tracing::error!(node_id, attempt, "node failed terminally: {message}");
                snapshot.context.push(
                    node_id,
                    NodeResult {
                        output: Value::Null,
                        timestamp: now,
                        error: Some(message),
                        attempt,
                    },
                );
                snapshot.status = RunStatus::Failed;
                snapshot.retry_state = None;
            }
        }
        snapshot
    }
}

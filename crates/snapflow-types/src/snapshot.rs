//! Execution state types: the snapshot and its per-node result history.
//!
//! The `Snapshot` is the sole unit of durable execution state. The engine
//! never mutates one in place; every step builds a new value by structural
//! copy, so a caller holding a prior reference observes no interference and
//! can persist with an optimistic check on `version`. Snapshots round-trip
//! losslessly through plain JSON.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current wall time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has a current node and the driver loop keeps advancing it.
    Active,
    /// Suspended by a node's pause flag; resumes on the next `execute` call.
    Paused,
    /// A node failed with retry budget remaining; resumable.
    Error,
    /// Terminal: the graph ran off its last edge.
    Completed,
    /// Terminal: a node exhausted its retries, or the engine aborted the run.
    Failed,
}

impl RunStatus {
    /// Terminal statuses are only ever read back, never resumed.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Suspended statuses flip back to `Active` when resumed.
    pub fn is_suspended(self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Error)
    }
}

// ---------------------------------------------------------------------------
// NodeResult / Context
// ---------------------------------------------------------------------------

/// The recorded outcome of one completed or failed node attempt.
///
/// Appended to the node's history on success and on failure, never on pause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResult {
    /// Executor output, or `null` for a failed attempt.
    pub output: Value,
    /// When the attempt finished, epoch milliseconds.
    pub timestamp: i64,
    /// Stringified failure cause, present only for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 1-based attempt counter, continuing across retries of the same node.
    pub attempt: u32,
}

/// Full execution history: an append-only list of results per node.
///
/// Entries are never removed or reordered; a node revisited by a loop or a
/// retry accumulates multiple entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Context(HashMap<String, Vec<NodeResult>>);

impl Context {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded results for a node, in execution order.
    pub fn results(&self, node_id: &str) -> Option<&[NodeResult]> {
        self.0.get(node_id).map(Vec::as_slice)
    }

    /// The most recent result for a node.
    pub fn latest(&self, node_id: &str) -> Option<&NodeResult> {
        self.0.get(node_id).and_then(|r| r.last())
    }

    /// Whether any attempt for the node has been recorded.
    pub fn contains(&self, node_id: &str) -> bool {
        self.0.contains_key(node_id)
    }

    /// Append a result to a node's history.
    pub fn push(&mut self, node_id: &str, result: NodeResult) {
        self.0.entry(node_id.to_string()).or_default().push(result);
    }

    /// Iterate over `(node_id, results)` pairs. Order is unspecified; the
    /// ordering guarantee lives inside each node's result list.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[NodeResult])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of nodes with at least one recorded attempt.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no attempt has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RetryState
// ---------------------------------------------------------------------------

/// In-snapshot record of an in-progress retry cycle for the stalled node.
///
/// When present it always refers to `Snapshot::current_node_id`; it is
/// cleared on any successful advance and on terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryState {
    /// The node whose attempts are being counted.
    pub node_id: String,
    /// Attempts completed so far (1-based).
    pub attempts: u32,
    /// Advisory earliest time for the next attempt, epoch milliseconds.
    /// The engine records it but never waits for it; firing is the caller's
    /// responsibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The complete, serializable execution state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Identifier of the workflow this run belongs to.
    pub workflow_id: String,
    /// Current run status; the driver loops only while `Active`.
    pub status: RunStatus,
    /// The node the next step will execute. `None` means the previous node
    /// had no outgoing edge and the run is complete.
    pub current_node_id: Option<String>,
    /// Accumulated per-node result history.
    pub context: Context,
    /// Monotonic counter, bumped by exactly 1 per successfully advanced node.
    /// Never changes on pause or on error-without-advance. Callers persist
    /// snapshots with an optimistic check on this field.
    pub version: u64,
    /// When the current `execute` call started, epoch milliseconds.
    pub last_started_at: i64,
    /// Accumulated milliseconds spent executing (excludes suspended time).
    pub total_execution_time: i64,
    /// Open diagnostic map (`failedReason`, `pausedReason`, ...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Retry bookkeeping for the currently stalled node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_state: Option<RetryState>,
}

impl Snapshot {
    /// Build the initial snapshot for a fresh run starting at `start_node_id`.
    pub fn initial(workflow_id: impl Into<String>, start_node_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: RunStatus::Active,
            current_node_id: Some(start_node_id.into()),
            context: Context::new(),
            version: 0,
            last_started_at: now_ms(),
            total_execution_time: 0,
            metadata: HashMap::new(),
            retry_state: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

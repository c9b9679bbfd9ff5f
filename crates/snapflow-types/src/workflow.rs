//! Workflow definition types for Snapflow.
//!
//! A workflow is a directed graph of typed nodes connected by edges. Nodes
//! carry static configuration (`data`) that may contain unresolved expression
//! placeholders; edges carry an optional `source_handle` label chosen
//! dynamically by a node's executor for conditional branching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single unit of work in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Unique identifier for the node within the workflow.
    pub id: String,
    /// The node's type, matching a key in the node definition registry.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static configuration data. May contain expression placeholders; owned
    /// by the definition and never mutated by the engine.
    pub data: Value,
    /// Extensible metadata (transformer hints, UI placement).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A possible transition between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    /// Unique identifier for the edge.
    pub id: String,
    /// ID of the node the edge originates from.
    pub source: String,
    /// ID of the node the edge leads to.
    pub target: String,
    /// Branch label on the source node. `None` is the unlabeled default
    /// branch; executors select a labeled branch via their result handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The blueprint for a workflow: the node list and the edge list.
///
/// Consumed once at engine construction. Node IDs must be unique within a
/// definition; the graph index rejects duplicates when it is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowDefinition {
    /// Nodes in the workflow.
    pub nodes: Vec<Node>,
    /// Edges connecting the nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// A retry policy field that is either a literal number or a deferred
/// expression string resolved at runtime by a middleware.
///
/// The engine treats unresolved expressions as opaque: coercing one that is
/// not plain numeric text yields `None`, which the retry resolver reads as
/// "no retry budget".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PolicyValue {
    /// A literal numeric value.
    Number(f64),
    /// An unresolved expression (e.g. `"{{ nodes.config.last.data.retries }}"`).
    Expression(String),
}

impl PolicyValue {
    /// Coerce to a number. Literal numbers pass through; expression strings
    /// parse as plain numeric text or coerce to `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PolicyValue::Number(n) => Some(*n),
            PolicyValue::Expression(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for PolicyValue {
    fn from(n: f64) -> Self {
        PolicyValue::Number(n)
    }
}

impl From<u32> for PolicyValue {
    fn from(n: u32) -> Self {
        PolicyValue::Number(n as f64)
    }
}

impl From<&str> for PolicyValue {
    fn from(s: &str) -> Self {
        PolicyValue::Expression(s.to_string())
    }
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant interval between attempts.
    Fixed,
    /// Interval doubles with each attempt.
    Exponential,
}

/// The backoff field of a retry policy: a known strategy or a deferred
/// expression string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BackoffValue {
    /// A resolved strategy.
    Strategy(BackoffStrategy),
    /// An unresolved expression, or a strategy name produced by one.
    Expression(String),
}

impl BackoffValue {
    /// Whether this backoff resolves to the exponential strategy. Anything
    /// else (fixed, unresolved, unknown text) behaves as fixed.
    pub fn is_exponential(&self) -> bool {
        match self {
            BackoffValue::Strategy(s) => *s == BackoffStrategy::Exponential,
            BackoffValue::Expression(s) => s.trim() == "exponential",
        }
    }
}

/// Configuration for retrying failed node executions.
///
/// Fields may be literal values or expression strings; expressions are
/// resolved by middleware into the step scratchpad before the error path
/// consults them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (the first execution counts as attempt 1).
    pub max_attempts: PolicyValue,
    /// Delay between attempts in milliseconds.
    pub interval: PolicyValue,
    /// Backoff strategy applied to the interval.
    pub backoff: BackoffValue,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

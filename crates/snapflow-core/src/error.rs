//! Fatal engine errors.
//!
//! These indicate a malformed workflow graph, registry, or caller protocol
//! violation. They propagate out of `execute` as `Err` and are never encoded
//! as a `failed` snapshot; node execution failures take the retry path in
//! `step.rs` instead.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The snapshot points at a node id that is not in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No registered definition for a node's type.
    #[error("node definition not found: {0}")]
    DefinitionNotFound(String),

    /// `execute` was called with neither a snapshot nor an initial node id.
    #[error("either a snapshot or an initial node id must be provided")]
    MissingStart,

    /// Two nodes in one workflow definition share an id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
}

//! Graph index: immutable node/edge lookup built once per engine.
//!
//! Borrowed view over a `WorkflowDefinition`. Node ids must be unique;
//! edges are matched in definition order, so the first edge whose
//! `(source, source_handle)` pair matches wins.

use std::collections::{HashMap, HashSet};

use snapflow_types::workflow::{Node, WorkflowDefinition};

use crate::error::EngineError;

#[derive(Debug)]
pub struct GraphIndex<'a> {
    nodes: HashMap<&'a str, &'a Node>,
    definition: &'a WorkflowDefinition,
}

impl<'a> GraphIndex<'a> {
    /// Index a workflow definition. Fails on duplicate node ids; duplicate
    /// `(source, handle)` branches are tolerated (first edge wins) but logged,
    /// since the later edge is unreachable.
    pub fn new(definition: &'a WorkflowDefinition) -> Result<Self, EngineError> {
        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            if nodes.insert(node.id.as_str(), node).is_some() {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut branches = HashSet::new();
        for edge in &definition.edges {
            if !branches.insert((edge.source.as_str(), edge.source_handle.as_deref())) {
                tracing::warn!(
                    source = %edge.source,
                    handle = edge.source_handle.as_deref().unwrap_or("<default>"),
                    "duplicate branch; edge {} is unreachable",
                    edge.id
                );
            }
        }

        Ok(Self { nodes, definition })
    }

    pub fn node(&self, id: &str) -> Option<&'a Node> {
        self.nodes.get(id).copied()
    }

    /// Target of the first edge leaving `source` whose handle equals the
    /// branch handle produced by the node. `None` on both sides denotes the
    /// unlabeled default branch; no matching edge means the run is complete.
    pub fn next_node_id(&self, source: &str, handle: Option<&str>) -> Option<&'a str> {
        self.definition
            .edges
            .iter()
            .find(|edge| edge.source == source && edge.source_handle.as_deref() == handle)
            .map(|edge| edge.target.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Stateless, resumable workflow execution core.
//!
//! Advances a directed graph of typed nodes one step at a time, keeping all
//! durable state in a serializable [`snapflow_types::snapshot::Snapshot`].
//! The caller persists the snapshot between calls and resubmits it to
//! continue, so engines can run from short-lived, stateless compute.
//!
//! Layers, innermost first: node executors (business logic behind the
//! [`node::NodeExecutor`] contract), the onion [`middleware`] pipeline wrapped
//! around each executor invocation, the step executor in `step`, and the
//! [`engine::WorkflowEngine`] driver loop on top.

pub mod engine;
pub mod error;
pub mod graph;
pub mod middleware;
pub mod node;
pub mod retry;
mod step;

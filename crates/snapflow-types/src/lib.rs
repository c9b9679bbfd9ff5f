//! Shared domain types for Snapflow.
//!
//! This crate contains the core domain types used across the engine:
//! workflow definitions (nodes, edges, retry policies) and execution state
//! (snapshots, per-node result history).
//!
//! Zero infrastructure dependencies -- only serde and chrono.

pub mod snapshot;
pub mod workflow;

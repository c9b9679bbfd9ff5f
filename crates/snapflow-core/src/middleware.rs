//! Onion-style middleware pipeline around the node executor.
//!
//! Given middlewares `[m0, m1, .., mn]`, one step run is equivalent to
//! `m0(ctx, || m1(ctx, || .. mn(ctx, executor) ..))`: array order going in,
//! reverse order coming back out. A middleware that never calls `next`
//! short-circuits everything downstream, including the executor itself.
//! The pipeline is purely sequential; there is no concurrent middleware
//! execution within one step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use serde_json::Value;

use snapflow_types::snapshot::Snapshot;
use snapflow_types::workflow::{Node, RetryPolicy};

use crate::node::{BoxNodeExecutor, NodeError};

pub type MiddlewareFuture<'a> = BoxFuture<'a, Result<(), NodeError>>;

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Intent a middleware communicates back to the step executor. Discarded
/// after the step.
#[derive(Debug, Clone, Default)]
pub struct StepState {
    /// Suspend the run at this node; nothing is recorded.
    pub pause: bool,
    /// Branch handle selecting the outgoing edge. Set by the executor's
    /// outcome; a middleware may override it on the way out.
    pub next_handle: Option<String>,
    /// Resolved retry policy, superseding the node definition's static one.
    /// Set by expression-resolving middlewares so the error path reads
    /// concrete numbers.
    pub retry_policy: Option<RetryPolicy>,
}

/// Ephemeral per-step context threaded through the middleware chain.
///
/// Built fresh for every node step and dropped afterwards; only what the
/// step executor copies out of it survives into the next snapshot.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The node being executed.
    pub node: Node,
    /// Metadata of the node's registered definition.
    pub definition_metadata: Option<Value>,
    /// Static retry policy of the node's registered definition, possibly
    /// still carrying unresolved expression strings.
    pub definition_retry_policy: Option<RetryPolicy>,
    /// The snapshot this step started from (read-only view for middlewares).
    pub snapshot: Snapshot,
    /// Engine-wide globals.
    pub globals: Option<Value>,
    /// Caller-supplied payload, present only on the first step of a call.
    pub external_payload: Option<Value>,
    /// Node input, seeded from a deep copy of `node.data`. Middlewares
    /// rewrite it in place before the executor runs.
    pub input: Value,
    /// Executor output, set by the innermost layer on success.
    pub output: Option<Value>,
    /// Explicit failure cause. When set by a middleware before it errors,
    /// this message is recorded instead of the propagated error.
    pub error: Option<String>,
    pub state: StepState,
}

// ---------------------------------------------------------------------------
// Middleware / Next
// ---------------------------------------------------------------------------

/// One interceptor in the chain.
///
/// Call `next.run(ctx).await` at most once to hand control inward; skipping
/// the call short-circuits the rest of the chain and the executor. Code after
/// the await runs on the way back out, in reverse chain order.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a mut StepContext, next: Next<'a>) -> MiddlewareFuture<'a>;
}

/// Continuation handed to each middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    executor: &'a BoxNodeExecutor,
    called: AtomicBool,
}

impl<'a> Next<'a> {
    /// Hand control to the next layer, or to the node executor at the end of
    /// the chain. Calling this a second time on the same `Next` is a protocol
    /// violation and yields an error (caught upstream as a normal node
    /// failure, subject to retry).
    pub fn run<'b>(&'b self, ctx: &'b mut StepContext) -> MiddlewareFuture<'b> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Box::pin(async { Err(NodeError::new("next() called multiple times")) });
        }
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    executor: self.executor,
                    called: AtomicBool::new(false),
                };
                middleware.handle(ctx, next)
            }
            None => Box::pin(invoke_executor(self.executor, ctx)),
        }
    }
}

/// Innermost layer: invoke the node executor and interpret its outcome.
async fn invoke_executor(
    executor: &BoxNodeExecutor,
    ctx: &mut StepContext,
) -> Result<(), NodeError> {
    let outcome = executor
        .execute(
            &ctx.input,
            &ctx.snapshot.context,
            ctx.external_payload.as_ref(),
            ctx.globals.as_ref(),
        )
        .await?;
    if outcome.pause {
        ctx.state.pause = true;
    } else {
        ctx.output = Some(outcome.data);
        ctx.state.next_handle = outcome.next_handle;
    }
    Ok(())
}

/// Compose and drive the whole chain for one step.
pub(crate) async fn run_pipeline(
    chain: &[Arc<dyn Middleware>],
    executor: &BoxNodeExecutor,
    ctx: &mut StepContext,
) -> Result<(), NodeError> {
    let next = Next {
        chain,
        index: 0,
        executor,
        called: AtomicBool::new(false),
    };
    next.run(ctx).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

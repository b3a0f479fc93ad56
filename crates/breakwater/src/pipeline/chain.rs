//! The runnable policy chain
//!
//! A chain is an ordered slice of [`PolicyLayer`]s around one transport
//! call. Each layer receives a [`Next`] continuation and decides when (and
//! how often) to invoke the rest of the chain; the continuation past the
//! last layer performs the actual transport call. Layers and continuations
//! are cheap clones over shared `Arc`s, so a retry layer re-runs its inner
//! chain by cloning `Next`, and a pessimistic timeout can detach a whole
//! inner execution onto a task.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::PipelineError;
use crate::pipeline::ExecutionContext;
use crate::request::PipelineResponse;
use crate::transport::Transport;

/// Outcome of one layer or chain execution
pub type PolicyResult = Result<PipelineResponse, PipelineError>;

/// One runnable policy in the chain
///
/// Implemented by every built-in policy and by custom-policy factories.
#[async_trait]
pub trait PolicyLayer: Send + Sync {
    /// Run this layer around the rest of the chain
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult;
}

/// Continuation invoking the remainder of the chain
#[derive(Clone)]
pub struct Next {
    layers: Arc<[Arc<dyn PolicyLayer>]>,
    index: usize,
    transport: Arc<dyn Transport>,
}

impl Next {
    pub(crate) fn new(layers: Arc<[Arc<dyn PolicyLayer>]>, transport: Arc<dyn Transport>) -> Self {
        Self { layers, index: 0, transport }
    }

    /// Run the remaining layers and, innermost, the transport call
    ///
    /// Checks the context's token first so an already-cancelled request
    /// unwinds promptly at every step. A transport failure observed after
    /// cancellation is classified as [`PipelineError::Cancelled`] so retry
    /// logic never mistakes abandonment for a transient fault.
    pub fn run(mut self, ctx: ExecutionContext) -> BoxFuture<'static, PolicyResult> {
        Box::pin(async move {
            if ctx.cancel().is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match self.layers.get(self.index).map(Arc::clone) {
                Some(layer) => {
                    self.index += 1;
                    layer.execute(ctx, self).await
                }
                None => match self.transport.send(ctx.request(), ctx.cancel()).await {
                    Ok(response) => Ok(response),
                    Err(_) if ctx.cancel().is_cancelled() => Err(PipelineError::Cancelled),
                    Err(error) => Err(error.into()),
                },
            }
        })
    }
}

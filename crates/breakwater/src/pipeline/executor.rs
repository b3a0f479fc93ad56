//! The pipeline handler wrapping the transport
//!
//! A [`ResiliencyPipeline`] owns one validated option set, the transport,
//! the diagnostics sink, and the prebuilt policy chains. It lives for the
//! lifetime of its named registration and serves any number of concurrent
//! requests; each call runs its own chain instance while the stateful
//! layers (circuit breaker, bulkhead) share state through the pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigurationError, PipelineError};
use crate::events::PipelineEvents;
use crate::options::ResiliencyOptions;
use crate::pipeline::builder::ChainSet;
use crate::pipeline::chain::Next;
use crate::pipeline::context::ExecutionContext;
use crate::policy::PolicyKind;
use crate::request::{PipelineRequest, PipelineResponse};
use crate::transport::Transport;

/// Executes requests through a validated policy chain
pub struct ResiliencyPipeline {
    options: ResiliencyOptions,
    transport: Arc<dyn Transport>,
    chains: ChainSet,
}

impl ResiliencyPipeline {
    /// Build a pipeline over the given transport and diagnostics sink
    ///
    /// Fails fast with a [`ConfigurationError`] when policies are configured
    /// without a diagnostics sink; an empty option set needs none and yields
    /// a pass-through.
    pub fn new(
        options: ResiliencyOptions,
        transport: Arc<dyn Transport>,
        events: Option<Arc<dyn PipelineEvents>>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_clock(options, transport, events, Arc::new(SystemClock))
    }

    /// Build a pipeline with a custom clock (useful for testing breakers)
    pub fn with_clock(
        options: ResiliencyOptions,
        transport: Arc<dyn Transport>,
        events: Option<Arc<dyn PipelineEvents>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        let chains = ChainSet::build(&options, events, clock)?;
        Ok(Self { options, transport, chains })
    }

    /// The option set this pipeline was built from
    pub fn options(&self) -> &ResiliencyOptions {
        &self.options
    }

    /// The chain the given method would execute, outermost first
    ///
    /// Introspection only; the same inputs always produce the same plan.
    pub fn execution_plan(&self, method: &http::Method) -> Vec<PolicyKind> {
        self.chains.chain_for(crate::request::is_idempotent(method)).kinds().to_vec()
    }

    /// Run one request through the chain
    ///
    /// The caller's token is linked, not replaced: a request-scoped token is
    /// derived from it and seeds the execution context. After the chain
    /// returns, a set pessimistic-timeout marker cancels the request scope
    /// so abandoned in-flight work is torn down rather than leaked.
    #[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
    pub async fn execute(
        &self,
        request: PipelineRequest,
        cancellation: CancellationToken,
    ) -> Result<PipelineResponse, PipelineError> {
        let scoped = cancellation.child_token();
        let chain = self.chains.chain_for(request.is_idempotent());
        let ctx = ExecutionContext::new(Arc::new(request), scoped.clone());

        let next = Next::new(chain.layers(), Arc::clone(&self.transport));
        let result = next.run(ctx.clone()).await;

        if ctx.timeout_fired() {
            debug!("pessimistic timeout fired; cancelling request scope");
            scoped.cancel();
        }

        result
    }
}

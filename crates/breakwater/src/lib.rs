//! Declarative resiliency policies for outbound requests.
//!
//! Breakwater composes cross-cutting behaviors (timeout, retry, circuit
//! breaking, bulkhead admission control, fallback) into one deterministic
//! pipeline around every outbound call. Policies are configured
//! individually, merged from named presets and caller overrides, validated
//! for structural consistency at build time, and executed with correct
//! cancellation and idempotency semantics under any number of concurrent
//! requests.
//!
//! # Building a pipeline
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use breakwater::{
//!     CircuitBreakerDefinition, PipelineRequest, ResiliencyOptions, ResiliencyPipeline,
//!     RetryDefinition, TracingEvents,
//! };
//! use http::Uri;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(transport: Arc<dyn breakwater::Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let options = ResiliencyOptions::builder()
//!     .retry(RetryDefinition::new().retry_count(5).use_jitter(true))
//!     .circuit_breaker(CircuitBreakerDefinition::new())
//!     .build()?;
//!
//! let pipeline = ResiliencyPipeline::new(options, transport, Some(Arc::new(TracingEvents)))?;
//!
//! let request = PipelineRequest::get(Uri::from_static("http://svc.local/health"));
//! let response = pipeline.execute(request, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Ordering
//!
//! Every policy carries an integer order deciding its position in the
//! chain: the lowest order sits closest to the transport, the highest runs
//! outermost. The canonical defaults in [`policy::order`] put a per-attempt
//! timeout innermost, retry around it, bulkhead and circuit breaker outside
//! the retried call, the fallback family above the breaker so it observes
//! fast-fail rejections, and an overall timeout outermost.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod clock;
pub mod error;
pub mod events;
pub mod options;
pub mod pipeline;
pub mod policy;
pub mod preset;
pub mod request;
pub mod serde_util;
pub mod transport;
pub mod validate;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{BoxError, ConfigurationError, PipelineError, TransportError};
pub use events::{PipelineEvents, TracingEvents};
pub use options::{ResiliencyOptions, ResiliencyOptionsBuilder};
pub use pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult, ResiliencyPipeline};
pub use policy::{
    BreakPredicate, BulkheadDefinition, CircuitBreakerDefinition, CircuitState, CustomDefinition,
    CustomPolicyFactory, FallbackAction, FallbackDefinition, FallbackOnBreakDefinition,
    PolicyDefinition, PolicyKind, RetryDefinition, RetryPredicate, TimeoutDefinition,
    TimeoutStrategy,
};
pub use preset::{presets, InMemoryPresetRegistry, PresetDefinition, PresetRegistry};
pub use request::{is_idempotent, Outcome, PipelineRequest, PipelineResponse};
#[cfg(feature = "transport-reqwest")]
pub use transport::ReqwestTransport;
pub use transport::Transport;
pub use validate::validate;

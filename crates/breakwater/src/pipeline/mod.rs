//! Request-time pipeline: chain construction and execution
//!
//! The chain builder selects and orders runnable policies for each request
//! (idempotency gating, custom precedence, deterministic composition); the
//! executor wraps one transport call with the chain, linking cancellation
//! and tearing down work abandoned by pessimistic timeouts.

mod builder;
mod chain;
mod context;
mod executor;

pub use chain::{Next, PolicyLayer, PolicyResult};
pub use context::ExecutionContext;
pub use executor::ResiliencyPipeline;

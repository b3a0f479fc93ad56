//! Diagnostics callbacks fired by policy decisions
//!
//! Every policy layer that makes a decision (a retry attempt, a circuit
//! break or reset, a bulkhead rejection, a timeout, a fallback substitution)
//! reports it through [`PipelineEvents`]. The callbacks are side-effecting
//! but must never block or fail the request: a sink that panics is caught
//! and logged, and the call's outcome is unchanged.
//!
//! [`TracingEvents`] is the bundled sink that forwards every callback to
//! `tracing`, so embedders get observability without writing their own.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::request::PipelineRequest;

/// Diagnostics sink receiving policy decisions
///
/// All methods default to no-ops so a sink only implements the callbacks it
/// cares about. A sink is required whenever a pipeline carries any policy;
/// see [`ResiliencyPipeline::new`](crate::pipeline::ResiliencyPipeline::new).
pub trait PipelineEvents: Send + Sync {
    /// A retry is about to be scheduled; `attempt` counts retries, starting at 1
    fn on_retry(&self, request: &PipelineRequest, attempt: u32, error: Option<&PipelineError>) {
        let _ = (request, attempt, error);
    }

    /// A timeout policy abandoned the call after `timeout`
    fn on_timeout(&self, request: &PipelineRequest, timeout: Duration) {
        let _ = (request, timeout);
    }

    /// The circuit breaker transitioned to open
    fn on_circuit_break(&self, request: &PipelineRequest, error: Option<&PipelineError>) {
        let _ = (request, error);
    }

    /// The circuit breaker reset to closed after a successful trial call
    fn on_circuit_reset(&self, request: &PipelineRequest) {
        let _ = request;
    }

    /// The bulkhead rejected the call (capacity and queue exhausted)
    fn on_bulkhead_rejected(&self, request: &PipelineRequest, error: &PipelineError) {
        let _ = (request, error);
    }

    /// A fallback action substituted the outcome
    fn on_fallback(&self, request: &PipelineRequest, error: &PipelineError) {
        let _ = (request, error);
    }
}

/// Invoke a diagnostics callback, isolating any panic it raises
///
/// Diagnostics failures must never convert an already-classified outcome
/// into a different one.
pub(crate) fn emit<F: FnOnce()>(callback: &'static str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("diagnostics sink panicked in {callback}; ignoring");
    }
}

/// A diagnostics sink that forwards every callback to `tracing`
///
/// Routine decisions log at debug; breaks, rejections and timeouts at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl PipelineEvents for TracingEvents {
    fn on_retry(&self, request: &PipelineRequest, attempt: u32, error: Option<&PipelineError>) {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            attempt,
            error = error.map(tracing::field::display),
            "retrying request"
        );
    }

    fn on_timeout(&self, request: &PipelineRequest, timeout: Duration) {
        warn!(
            method = %request.method(),
            uri = %request.uri(),
            ?timeout,
            "request timed out"
        );
    }

    fn on_circuit_break(&self, request: &PipelineRequest, error: Option<&PipelineError>) {
        warn!(
            method = %request.method(),
            uri = %request.uri(),
            error = error.map(tracing::field::display),
            "circuit breaker opened"
        );
    }

    fn on_circuit_reset(&self, request: &PipelineRequest) {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            "circuit breaker closed"
        );
    }

    fn on_bulkhead_rejected(&self, request: &PipelineRequest, error: &PipelineError) {
        warn!(
            method = %request.method(),
            uri = %request.uri(),
            %error,
            "bulkhead rejected request"
        );
    }

    fn on_fallback(&self, request: &PipelineRequest, error: &PipelineError) {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            %error,
            "fallback substituted outcome"
        );
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;

    /// Validates that a panicking diagnostics sink is isolated: the emit
    /// helper swallows the panic instead of letting it unwind the request.
    #[test]
    fn test_panicking_sink_is_isolated() {
        struct ExplodingSink;
        impl PipelineEvents for ExplodingSink {
            fn on_circuit_reset(&self, _request: &PipelineRequest) {
                panic!("sink bug");
            }
        }

        let sink = ExplodingSink;
        let request = PipelineRequest::get(Uri::from_static("http://svc.local/"));
        emit("on_circuit_reset", || sink.on_circuit_reset(&request));
    }
}

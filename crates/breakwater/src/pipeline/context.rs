//! Per-request execution context
//!
//! One context is seeded per execution and passed down through every layer.
//! It carries exactly the named state the chain needs: the request, the
//! request's cancellation token, and the pessimistic-timeout marker. Clones
//! share the marker; a layer that swaps in a derived cancellation token
//! (timeouts do) still shares the request and the marker with its parent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::request::PipelineRequest;

/// Context threaded through the policy chain for one request
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request: Arc<PipelineRequest>,
    cancel: CancellationToken,
    timeout_fired: Arc<AtomicBool>,
}

impl ExecutionContext {
    pub(crate) fn new(request: Arc<PipelineRequest>, cancel: CancellationToken) -> Self {
        Self { request, cancel, timeout_fired: Arc::new(AtomicBool::new(false)) }
    }

    /// The request being executed
    pub fn request(&self) -> &PipelineRequest {
        &self.request
    }

    /// The cancellation token scoping this part of the execution
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A clone of this context scoped to a different cancellation token
    ///
    /// Used by timeout layers to link a timer-derived token for the inner
    /// portion of the chain; request and marker stay shared.
    #[must_use]
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self { request: Arc::clone(&self.request), cancel, timeout_fired: Arc::clone(&self.timeout_fired) }
    }

    /// Whether a pessimistic timeout has abandoned in-flight work
    pub fn timeout_fired(&self) -> bool {
        self.timeout_fired.load(Ordering::Acquire)
    }

    /// Record that a pessimistic timeout abandoned in-flight work
    ///
    /// The executor checks the marker after the chain returns and cancels
    /// the request-scoped token so the abandoned call is torn down.
    pub fn mark_timeout_fired(&self) {
        self.timeout_fired.store(true, Ordering::Release);
    }

    /// A standalone context for unit tests
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use http::Uri;

        Self::new(
            Arc::new(PipelineRequest::get(Uri::from_static("http://svc.local/test"))),
            CancellationToken::new(),
        )
    }
}

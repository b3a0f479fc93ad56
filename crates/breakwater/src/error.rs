//! Error types for pipeline configuration and execution
//!
//! Two distinct failure surfaces exist: [`ConfigurationError`] is raised at
//! build/validate time and is always fatal to pipeline activation, while
//! [`PipelineError`] is the per-request outcome a caller observes when the
//! transport fails, a policy rejects the call, or the request is abandoned.
//!
//! `PipelineError` carries its own classification helpers
//! ([`is_retryable_by_default`](PipelineError::is_retryable_by_default),
//! [`is_rejection`](PipelineError::is_rejection),
//! [`is_cancellation`](PipelineError::is_cancellation)) so that retry and
//! circuit-breaker predicates never have to pattern-match on variants
//! directly: rejections are intentional fast-fail signals and cancellation is
//! a distinct outcome, and neither is ever mistaken for a transient fault.

use std::time::Duration;

use thiserror::Error;

use crate::policy::PolicyKind;

/// Boxed error type carried by transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building or validating a policy set
///
/// Configuration errors are surfaced synchronously to whoever builds the
/// pipeline and block activation; they are never retried or deferred to the
/// first request.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Two policies share the same order value
    #[error("duplicate policy order {order}: {first} and {second} cannot share a position")]
    DuplicateOrder {
        /// The conflicting order value
        order: i32,
        /// Kind of the first policy holding the order
        first: PolicyKind,
        /// Kind of the second policy holding the order
        second: PolicyKind,
    },

    /// A fallback-family policy was configured without a circuit breaker
    #[error("{kind} requires a circuit breaker policy in the same set")]
    MissingCircuitBreaker {
        /// The policy kind that depends on the circuit breaker
        kind: PolicyKind,
    },

    /// A fallback-family policy does not hold the maximum order
    #[error(
        "{kind} at order {order} must hold the maximum order among non-timeout policies, \
         but {other} holds order {other_order}"
    )]
    FallbackNotLast {
        /// The misplaced fallback-family kind
        kind: PolicyKind,
        /// Its configured order
        order: i32,
        /// The policy kind ordered after it
        other: PolicyKind,
        /// That policy's order
        other_order: i32,
    },

    /// Fallback-on-break does not immediately precede fallback
    #[error(
        "fallback-on-break at order {on_break_order} must immediately precede fallback \
         at order {fallback_order}"
    )]
    FallbackOnBreakNotAdjacent {
        /// The fallback-on-break order
        on_break_order: i32,
        /// The fallback order
        fallback_order: i32,
    },

    /// A custom policy was combined with other policies
    #[error("a custom policy cannot be combined with other policies ({others} more configured)")]
    MixedCustomPolicy {
        /// How many additional policies were configured alongside the custom one
        others: usize,
    },

    /// A non-empty policy set was built without a diagnostics sink
    #[error("a diagnostics sink is required when policies are configured ({policies} configured)")]
    MissingDiagnostics {
        /// How many policies the set carries
        policies: usize,
    },

    /// A named preset could not be resolved
    #[error("unknown preset \"{name}\"")]
    UnknownPreset {
        /// The unresolved preset name
        name: String,
    },

    /// A policy parameter holds an invalid value
    #[error("invalid {field}: {message}")]
    InvalidParameter {
        /// The offending parameter
        field: &'static str,
        /// Why the value is rejected
        message: String,
    },
}

/// Error raised by the underlying transport
///
/// The engine never inspects the source beyond classification; it is
/// preserved for the caller.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Create a transport error from a message alone
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    /// Create a transport error preserving the underlying cause
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self { message: message.into(), source: Some(source.into()) }
    }
}

/// Per-request outcome errors observed by pipeline callers
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The underlying transport call failed
    #[error("transport error: {source}")]
    Transport {
        /// The transport failure
        #[from]
        source: TransportError,
    },

    /// A timeout policy abandoned the call
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// The configured timeout that fired
        timeout: Duration,
    },

    /// The circuit breaker is open, rejecting calls
    #[error("circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// The bulkhead rejected the call
    #[error("bulkhead capacity exceeded: {max_parallelization} in flight, {max_queuing} queued")]
    BulkheadRejected {
        /// Configured parallelization limit
        max_parallelization: u32,
        /// Configured queue limit
        max_queuing: u32,
    },

    /// The caller or a timeout abandoned the request
    #[error("request was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Build a transport error from any underlying cause
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Self::Transport { source: TransportError::with_source("request failed", source) }
    }

    /// Whether this outcome is an intentional fast-fail rejection
    ///
    /// Rejections are never retried by the retry layer and never counted by
    /// the circuit breaker's default predicate.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::BulkheadRejected { .. })
    }

    /// Whether this outcome represents caller- or timeout-initiated abandonment
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the default retry predicate treats this error as transient
    ///
    /// Transport failures and per-attempt timeouts retry; rejections and
    /// cancellation never do.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

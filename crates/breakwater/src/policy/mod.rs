//! Policy definitions and their merge semantics
//!
//! A [`PolicyDefinition`] is an immutable value describing the configuration
//! of exactly one cross-cutting behavior. The set of kinds is closed: merge
//! dispatch is an exhaustive pattern match over the enum, so adding a kind
//! is a compile-checked change rather than a runtime type lookup.
//!
//! Each definition carries an `order` deciding its position in the execution
//! chain: the lowest order sits closest to the transport (innermost), the
//! highest order is the outermost layer. Canonical defaults live in
//! [`order`]; a caller may override any individual policy's order.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::PipelineError;
use crate::pipeline::PolicyLayer;
use crate::request::{Outcome, PipelineRequest, PipelineResponse};

pub mod bulkhead;
pub mod circuit_breaker;
pub mod custom;
pub mod fallback;
pub mod merge;
pub mod retry;
pub mod timeout;

pub use bulkhead::BulkheadDefinition;
pub use circuit_breaker::{CircuitBreakerDefinition, CircuitState};
pub use custom::CustomDefinition;
pub use fallback::{FallbackDefinition, FallbackOnBreakDefinition};
pub use retry::RetryDefinition;
pub use timeout::{TimeoutDefinition, TimeoutStrategy};

/// Predicate deciding whether a call outcome should be retried
pub type RetryPredicate = Arc<dyn Fn(Outcome<'_>) -> bool + Send + Sync>;

/// Predicate deciding whether a call outcome counts as a breaker failure
pub type BreakPredicate = Arc<dyn Fn(Outcome<'_>) -> bool + Send + Sync>;

/// Async action producing a substitute response for a failed call
pub type FallbackAction =
    Arc<dyn Fn(&PipelineRequest, &PipelineError) -> BoxFuture<'static, PipelineResponse> + Send + Sync>;

/// Factory producing an opaque runnable policy layer
pub type CustomPolicyFactory = Arc<dyn Fn() -> Arc<dyn PolicyLayer> + Send + Sync>;

/// Canonical default orders for each policy kind
///
/// Chosen consecutive so that the default fallback-on-break / fallback pair
/// satisfies the adjacency invariant out of the box. The lowest order runs
/// innermost: a per-attempt timeout bounds one transport attempt, retry
/// wraps it, admission control and the breaker sit outside the retried call,
/// the fallback family observes their rejections, and an overall timeout
/// bounds the whole execution.
pub mod order {
    /// Per-attempt timeout (innermost)
    pub const ATTEMPT_TIMEOUT: i32 = 1;
    /// Retry
    pub const RETRY: i32 = 2;
    /// Bulkhead admission control
    pub const BULKHEAD: i32 = 3;
    /// Circuit breaker
    pub const CIRCUIT_BREAKER: i32 = 4;
    /// Fallback on circuit break
    pub const FALLBACK_ON_BREAK: i32 = 5;
    /// General fallback
    pub const FALLBACK: i32 = 6;
    /// Overall timeout (outermost)
    pub const OVERALL_TIMEOUT: i32 = 7;
}

/// The closed set of policy kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Per-attempt timeout
    AttemptTimeout,
    /// Retry with backoff
    Retry,
    /// Bulkhead admission control
    Bulkhead,
    /// Circuit breaker
    CircuitBreaker,
    /// Fallback on circuit break
    FallbackOnBreak,
    /// General fallback
    Fallback,
    /// Overall timeout
    OverallTimeout,
    /// Opaque caller-provided policy
    Custom,
}

impl PolicyKind {
    /// Whether this kind is one of the two timeout positions
    ///
    /// Timeout kinds are exempt from the fallback maximum-order comparison:
    /// the fallback family must run last among the non-timeout layers.
    pub fn is_timeout(self) -> bool {
        matches!(self, Self::AttemptTimeout | Self::OverallTimeout)
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AttemptTimeout => "attempt-timeout",
            Self::Retry => "retry",
            Self::Bulkhead => "bulkhead",
            Self::CircuitBreaker => "circuit-breaker",
            Self::FallbackOnBreak => "fallback-on-break",
            Self::Fallback => "fallback",
            Self::OverallTimeout => "overall-timeout",
            Self::Custom => "custom",
        };
        write!(f, "{name}")
    }
}

/// Configuration for one cross-cutting behavior
///
/// One variant per kind; both timeout positions share a definition shape.
#[derive(Clone)]
pub enum PolicyDefinition {
    /// Per-attempt timeout
    AttemptTimeout(TimeoutDefinition),
    /// Retry with backoff
    Retry(RetryDefinition),
    /// Bulkhead admission control
    Bulkhead(BulkheadDefinition),
    /// Circuit breaker
    CircuitBreaker(CircuitBreakerDefinition),
    /// Fallback on circuit break
    FallbackOnBreak(FallbackOnBreakDefinition),
    /// General fallback
    Fallback(FallbackDefinition),
    /// Overall timeout
    OverallTimeout(TimeoutDefinition),
    /// Opaque caller-provided policy
    Custom(CustomDefinition),
}

impl PolicyDefinition {
    /// The kind tag of this definition
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::AttemptTimeout(_) => PolicyKind::AttemptTimeout,
            Self::Retry(_) => PolicyKind::Retry,
            Self::Bulkhead(_) => PolicyKind::Bulkhead,
            Self::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            Self::FallbackOnBreak(_) => PolicyKind::FallbackOnBreak,
            Self::Fallback(_) => PolicyKind::Fallback,
            Self::OverallTimeout(_) => PolicyKind::OverallTimeout,
            Self::Custom(_) => PolicyKind::Custom,
        }
    }

    /// The configured chain position
    pub fn order(&self) -> i32 {
        match self {
            Self::AttemptTimeout(def) | Self::OverallTimeout(def) => def.order,
            Self::Retry(def) => def.order,
            Self::Bulkhead(def) => def.order,
            Self::CircuitBreaker(def) => def.order,
            Self::FallbackOnBreak(def) => def.order,
            Self::Fallback(def) => def.order,
            Self::Custom(def) => def.order,
        }
    }

    /// Merge this (caller) definition over a same-kind preset definition
    ///
    /// Field-by-field: a field left at the kind's documented default takes
    /// the preset's value, an explicitly overridden field wins. Custom
    /// factories are not merge-aware; the caller's instance is kept. A kind
    /// mismatch keeps the caller unchanged (the merge engine only pairs
    /// same-kind definitions).
    pub(crate) fn merge(self, preset: &PolicyDefinition) -> PolicyDefinition {
        match (self, preset) {
            (Self::AttemptTimeout(own), Self::AttemptTimeout(other)) => {
                Self::AttemptTimeout(own.merge(other, &TimeoutDefinition::attempt()))
            }
            (Self::OverallTimeout(own), Self::OverallTimeout(other)) => {
                Self::OverallTimeout(own.merge(other, &TimeoutDefinition::overall()))
            }
            (Self::Retry(own), Self::Retry(other)) => Self::Retry(own.merge(other)),
            (Self::Bulkhead(own), Self::Bulkhead(other)) => Self::Bulkhead(own.merge(other)),
            (Self::CircuitBreaker(own), Self::CircuitBreaker(other)) => {
                Self::CircuitBreaker(own.merge(other))
            }
            (Self::FallbackOnBreak(own), Self::FallbackOnBreak(other)) => {
                Self::FallbackOnBreak(own.merge(other))
            }
            (Self::Fallback(own), Self::Fallback(other)) => Self::Fallback(own.merge(other)),
            (own @ Self::Custom(_), _) => own,
            (own, _) => own,
        }
    }
}

impl fmt::Debug for PolicyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptTimeout(def) => f.debug_tuple("AttemptTimeout").field(def).finish(),
            Self::Retry(def) => f.debug_tuple("Retry").field(def).finish(),
            Self::Bulkhead(def) => f.debug_tuple("Bulkhead").field(def).finish(),
            Self::CircuitBreaker(def) => f.debug_tuple("CircuitBreaker").field(def).finish(),
            Self::FallbackOnBreak(def) => f.debug_tuple("FallbackOnBreak").field(def).finish(),
            Self::Fallback(def) => f.debug_tuple("Fallback").field(def).finish(),
            Self::OverallTimeout(def) => f.debug_tuple("OverallTimeout").field(def).finish(),
            Self::Custom(def) => f.debug_tuple("Custom").field(def).finish(),
        }
    }
}

//! Per-request chain construction
//!
//! Runnable policy instances are built once per pipeline so circuit-breaker
//! and bulkhead state is shared by every concurrent request. Per request,
//! the builder only selects from them:
//!
//! 1. start from the full definition list, ascending by order;
//! 2. idempotency gating: a non-idempotent method drops every retry that
//!    did not opt in via `apply_to_non_idempotent`;
//! 3. custom precedence: any remaining custom policy takes sole control
//!    (defensive; validation already forbids mixing);
//! 4. compose the rest with the lowest order innermost, closest to the
//!    transport. One layer wraps the call alone; zero layers pass through.
//!
//! Only the request method affects selection, so both possible chains are
//! precomputed and the per-request step is a lookup. For a fixed option set
//! and method, the chain is always the same.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ConfigurationError;
use crate::events::PipelineEvents;
use crate::options::ResiliencyOptions;
use crate::pipeline::chain::PolicyLayer;
use crate::policy::bulkhead::BulkheadLayer;
use crate::policy::circuit_breaker::CircuitBreakerLayer;
use crate::policy::fallback::{FallbackLayer, FallbackOnBreakLayer};
use crate::policy::retry::RetryLayer;
use crate::policy::timeout::TimeoutLayer;
use crate::policy::{PolicyDefinition, PolicyKind};

/// One built policy with the metadata selection needs
struct BuiltPolicy {
    kind: PolicyKind,
    layer: Arc<dyn PolicyLayer>,
    retry_applies_to_non_idempotent: bool,
}

/// A precomputed chain: execution order (outermost first) plus its plan
#[derive(Clone)]
pub(crate) struct BuiltChain {
    kinds: Vec<PolicyKind>,
    layers: Arc<[Arc<dyn PolicyLayer>]>,
}

impl BuiltChain {
    pub(crate) fn layers(&self) -> Arc<[Arc<dyn PolicyLayer>]> {
        Arc::clone(&self.layers)
    }

    pub(crate) fn kinds(&self) -> &[PolicyKind] {
        &self.kinds
    }
}

/// The two chains a pipeline can run, selected by request method
pub(crate) struct ChainSet {
    idempotent: BuiltChain,
    non_idempotent: BuiltChain,
}

impl ChainSet {
    /// Build runnable layers from a validated option set
    ///
    /// Fails when policies are configured without a diagnostics sink: the
    /// policies must always be observable.
    pub(crate) fn build(
        options: &ResiliencyOptions,
        events: Option<Arc<dyn PipelineEvents>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        if options.is_empty() {
            let empty = BuiltChain { kinds: Vec::new(), layers: Arc::from(Vec::new()) };
            return Ok(Self { idempotent: empty.clone(), non_idempotent: empty });
        }

        let events = events
            .ok_or(ConfigurationError::MissingDiagnostics { policies: options.len() })?;

        // ascending order; one runnable per definition, state shared across
        // requests for the stateful kinds
        let built: Vec<BuiltPolicy> = options
            .policies()
            .iter()
            .map(|policy| build_policy(policy, &events, &clock))
            .collect();

        Ok(Self {
            idempotent: select(&built, true),
            non_idempotent: select(&built, false),
        })
    }

    pub(crate) fn chain_for(&self, idempotent: bool) -> &BuiltChain {
        if idempotent {
            &self.idempotent
        } else {
            &self.non_idempotent
        }
    }
}

fn build_policy(
    policy: &PolicyDefinition,
    events: &Arc<dyn PipelineEvents>,
    clock: &Arc<dyn Clock>,
) -> BuiltPolicy {
    let (layer, retry_applies): (Arc<dyn PolicyLayer>, bool) = match policy {
        PolicyDefinition::AttemptTimeout(def) | PolicyDefinition::OverallTimeout(def) => {
            (Arc::new(TimeoutLayer::new(def, Arc::clone(events))), false)
        }
        PolicyDefinition::Retry(def) => (
            Arc::new(RetryLayer::new(def, Arc::clone(events))),
            def.apply_to_non_idempotent,
        ),
        PolicyDefinition::Bulkhead(def) => {
            (Arc::new(BulkheadLayer::new(def, Arc::clone(events))), false)
        }
        PolicyDefinition::CircuitBreaker(def) => (
            Arc::new(CircuitBreakerLayer::new(def, Arc::clone(events), Arc::clone(clock))),
            false,
        ),
        PolicyDefinition::FallbackOnBreak(def) => {
            (Arc::new(FallbackOnBreakLayer::new(def, Arc::clone(events))), false)
        }
        PolicyDefinition::Fallback(def) => {
            (Arc::new(FallbackLayer::new(def, Arc::clone(events))), false)
        }
        PolicyDefinition::Custom(def) => (def.build(), false),
    };
    BuiltPolicy { kind: policy.kind(), layer, retry_applies_to_non_idempotent: retry_applies }
}

/// Apply idempotency gating and custom precedence, then fix execution order
fn select(built: &[BuiltPolicy], idempotent: bool) -> BuiltChain {
    let gated: Vec<&BuiltPolicy> = built
        .iter()
        .filter(|policy| {
            idempotent
                || policy.kind != PolicyKind::Retry
                || policy.retry_applies_to_non_idempotent
        })
        .collect();

    // defensive: a custom policy that survived gating runs alone
    if let Some(custom) = gated.iter().find(|policy| policy.kind == PolicyKind::Custom) {
        return BuiltChain {
            kinds: vec![PolicyKind::Custom],
            layers: Arc::from(vec![Arc::clone(&custom.layer)]),
        };
    }

    // definitions are ascending by order; execution enters outermost
    // (highest order) first
    let kinds: Vec<PolicyKind> = gated.iter().rev().map(|policy| policy.kind).collect();
    let layers: Vec<Arc<dyn PolicyLayer>> =
        gated.iter().rev().map(|policy| Arc::clone(&policy.layer)).collect();

    BuiltChain { kinds, layers: Arc::from(layers) }
}

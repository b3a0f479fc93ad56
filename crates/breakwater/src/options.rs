//! Validated, ordered policy collections
//!
//! A [`ResiliencyOptions`] is the immutable configuration of one named
//! pipeline: constructed once from presets and caller overrides, validated
//! once, then reused unvalidated for every request the pipeline handles.

use crate::error::ConfigurationError;
use crate::policy::merge::merge_policy_sets;
use crate::policy::{
    BulkheadDefinition, CircuitBreakerDefinition, CustomDefinition, FallbackDefinition,
    FallbackOnBreakDefinition, PolicyDefinition, RetryDefinition, TimeoutDefinition,
};
use crate::preset::{PresetDefinition, PresetRegistry};
use crate::validate::validate;

/// The validated, ordered policy set for one named pipeline
#[derive(Debug, Clone, Default)]
pub struct ResiliencyOptions {
    policies: Vec<PolicyDefinition>,
}

impl ResiliencyOptions {
    /// Validate a policy list and freeze it, sorted ascending by order
    ///
    /// Fails fast with a [`ConfigurationError`] on any structural invariant
    /// violation; an empty list is valid and yields a pass-through pipeline.
    pub fn new(mut policies: Vec<PolicyDefinition>) -> Result<Self, ConfigurationError> {
        validate(&policies)?;
        policies.sort_by_key(PolicyDefinition::order);
        Ok(Self { policies })
    }

    /// An empty, pass-through option set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building an option set from presets and overrides
    pub fn builder() -> ResiliencyOptionsBuilder {
        ResiliencyOptionsBuilder::default()
    }

    /// The policies, ascending by order
    pub fn policies(&self) -> &[PolicyDefinition] {
        &self.policies
    }

    /// Whether no policies are configured
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// How many policies are configured
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Build an option set without validating it
    ///
    /// Exists so tests can exercise the chain builder's defensive rules on
    /// sets the public constructor would reject.
    #[cfg(test)]
    pub(crate) fn unvalidated(policies: Vec<PolicyDefinition>) -> Self {
        Self { policies }
    }
}

/// Source of one preset contribution, kept in declaration order
#[derive(Debug, Clone)]
enum PresetSource {
    Inline(PresetDefinition),
    Named(String),
}

/// Fluent builder combining presets and caller overrides
///
/// Presets apply in declaration order, each later preset merging over the
/// accumulated set; caller overrides then merge over the preset result, and
/// the final set is validated.
#[derive(Debug, Default)]
pub struct ResiliencyOptionsBuilder {
    presets: Vec<PresetSource>,
    overrides: Vec<PolicyDefinition>,
}

impl ResiliencyOptionsBuilder {
    /// Apply a preset the caller already resolved
    #[must_use]
    pub fn preset(mut self, preset: &PresetDefinition) -> Self {
        self.presets.push(PresetSource::Inline(preset.clone()));
        self
    }

    /// Apply a named preset, resolved at build time against a registry
    #[must_use]
    pub fn preset_named(mut self, name: impl Into<String>) -> Self {
        self.presets.push(PresetSource::Named(name.into()));
        self
    }

    /// Add any policy definition as a caller override
    #[must_use]
    pub fn policy(mut self, policy: PolicyDefinition) -> Self {
        self.overrides.push(policy);
        self
    }

    /// Add a per-attempt timeout override
    #[must_use]
    pub fn attempt_timeout(self, def: TimeoutDefinition) -> Self {
        self.policy(PolicyDefinition::AttemptTimeout(def))
    }

    /// Add an overall timeout override
    #[must_use]
    pub fn overall_timeout(self, def: TimeoutDefinition) -> Self {
        self.policy(PolicyDefinition::OverallTimeout(def))
    }

    /// Add a retry override
    #[must_use]
    pub fn retry(self, def: RetryDefinition) -> Self {
        self.policy(PolicyDefinition::Retry(def))
    }

    /// Add a circuit-breaker override
    #[must_use]
    pub fn circuit_breaker(self, def: CircuitBreakerDefinition) -> Self {
        self.policy(PolicyDefinition::CircuitBreaker(def))
    }

    /// Add a bulkhead override
    #[must_use]
    pub fn bulkhead(self, def: BulkheadDefinition) -> Self {
        self.policy(PolicyDefinition::Bulkhead(def))
    }

    /// Add a fallback override
    #[must_use]
    pub fn fallback(self, def: FallbackDefinition) -> Self {
        self.policy(PolicyDefinition::Fallback(def))
    }

    /// Add a fallback-on-break override
    #[must_use]
    pub fn fallback_on_break(self, def: FallbackOnBreakDefinition) -> Self {
        self.policy(PolicyDefinition::FallbackOnBreak(def))
    }

    /// Add a custom policy
    #[must_use]
    pub fn custom(self, def: CustomDefinition) -> Self {
        self.policy(PolicyDefinition::Custom(def))
    }

    /// Merge, validate and freeze; named presets must be resolvable
    pub fn build_with_registry(
        self,
        registry: &dyn PresetRegistry,
    ) -> Result<ResiliencyOptions, ConfigurationError> {
        let mut preset_set: Vec<PolicyDefinition> = Vec::new();
        for source in self.presets {
            let preset = match source {
                PresetSource::Inline(preset) => preset,
                PresetSource::Named(name) => registry
                    .get(&name)
                    .cloned()
                    .ok_or(ConfigurationError::UnknownPreset { name })?,
            };
            preset_set = merge_policy_sets(preset_set, preset.into_policies());
        }

        let merged = merge_policy_sets(preset_set, self.overrides);
        ResiliencyOptions::new(merged)
    }

    /// Merge, validate and freeze without a registry
    ///
    /// Any preset added by name fails with
    /// [`ConfigurationError::UnknownPreset`].
    pub fn build(self) -> Result<ResiliencyOptions, ConfigurationError> {
        struct NoPresets;
        impl PresetRegistry for NoPresets {
            fn get(&self, _name: &str) -> Option<&PresetDefinition> {
                None
            }
        }
        self.build_with_registry(&NoPresets)
    }
}

//! Named, reusable policy bundles
//!
//! A preset is an unvalidated bundle of policy definitions applied before
//! caller-specific overrides. The [`PresetRegistry`] trait is the interface
//! the configuration layer implements; [`InMemoryPresetRegistry`] is the
//! bundled implementation for embedders and tests. The [`presets`] module
//! carries a few prebuilt bundles for common call profiles.

use std::collections::HashMap;

use crate::policy::PolicyDefinition;

/// A named bundle of policy definitions
///
/// Presets are not validated on their own: structure is checked once the
/// final merged set is frozen into
/// [`ResiliencyOptions`](crate::options::ResiliencyOptions).
#[derive(Debug, Clone)]
pub struct PresetDefinition {
    name: String,
    policies: Vec<PolicyDefinition>,
}

impl PresetDefinition {
    /// Create a preset from a name and its policies
    pub fn new(name: impl Into<String>, policies: Vec<PolicyDefinition>) -> Self {
        Self { name: name.into(), policies }
    }

    /// The preset's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bundled policies
    pub fn policies(&self) -> &[PolicyDefinition] {
        &self.policies
    }

    /// Consume the preset, yielding its policies
    pub fn into_policies(self) -> Vec<PolicyDefinition> {
        self.policies
    }
}

/// Lookup interface for named presets
pub trait PresetRegistry: Send + Sync {
    /// Resolve a preset by name
    fn get(&self, name: &str) -> Option<&PresetDefinition>;
}

/// A registry holding presets in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryPresetRegistry {
    presets: HashMap<String, PresetDefinition>,
}

impl InMemoryPresetRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the bundled [`presets`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(presets::standard());
        registry.register(presets::aggressive());
        registry.register(presets::read_heavy());
        registry
    }

    /// Add or replace a preset under its own name
    pub fn register(&mut self, preset: PresetDefinition) {
        self.presets.insert(preset.name().to_string(), preset);
    }
}

impl PresetRegistry for InMemoryPresetRegistry {
    fn get(&self, name: &str) -> Option<&PresetDefinition> {
        self.presets.get(name)
    }
}

/// Prebuilt presets for common call profiles
pub mod presets {
    use std::time::Duration;

    use super::PresetDefinition;
    use crate::policy::{
        BulkheadDefinition, CircuitBreakerDefinition, PolicyDefinition, RetryDefinition,
        TimeoutDefinition,
    };

    /// Balanced defaults: per-attempt timeout, retry, circuit breaker
    pub fn standard() -> PresetDefinition {
        PresetDefinition::new(
            "standard",
            vec![
                PolicyDefinition::AttemptTimeout(TimeoutDefinition::attempt()),
                PolicyDefinition::Retry(RetryDefinition::new()),
                PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            ],
        )
    }

    /// Fast-recovery profile: more, quicker retries and a short break
    pub fn aggressive() -> PresetDefinition {
        PresetDefinition::new(
            "aggressive",
            vec![
                PolicyDefinition::AttemptTimeout(
                    TimeoutDefinition::attempt().duration(Duration::from_millis(500)),
                ),
                PolicyDefinition::Retry(
                    RetryDefinition::new()
                        .retry_count(5)
                        .delay(Duration::from_millis(200))
                        .use_jitter(true),
                ),
                PolicyDefinition::CircuitBreaker(
                    CircuitBreakerDefinition::new().break_duration(Duration::from_secs(10)),
                ),
            ],
        )
    }

    /// High-volume read profile: wide bulkhead, jittered retries
    pub fn read_heavy() -> PresetDefinition {
        PresetDefinition::new(
            "read-heavy",
            vec![
                PolicyDefinition::Retry(RetryDefinition::new().use_jitter(true)),
                PolicyDefinition::Bulkhead(
                    BulkheadDefinition::new().max_parallelization(128).max_queuing(64),
                ),
                PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ResiliencyOptions;

    /// Validates that every bundled preset produces a structurally valid
    /// option set on its own.
    #[test]
    fn test_builtin_presets_validate() {
        for preset in [presets::standard(), presets::aggressive(), presets::read_heavy()] {
            let name = preset.name().to_string();
            assert!(
                ResiliencyOptions::new(preset.into_policies()).is_ok(),
                "preset {name} must validate"
            );
        }
    }

    /// Validates registry lookup by name, including the preloaded builtins.
    #[test]
    fn test_registry_lookup() {
        let registry = InMemoryPresetRegistry::with_builtins();
        assert!(registry.get("standard").is_some());
        assert!(registry.get("aggressive").is_some());
        assert!(registry.get("read-heavy").is_some());
        assert!(registry.get("unheard-of").is_none());
    }
}

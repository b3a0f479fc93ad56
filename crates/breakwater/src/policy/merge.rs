//! Preset/override merge engine
//!
//! Combines a preset policy set with a caller-override set into one final
//! set, per policy kind:
//!
//! 1. Every caller policy with a same-kind preset merges over it field by
//!    field (override wins unless the field equals the kind's documented
//!    default; allowance booleans combine by OR).
//! 2. A caller policy with no same-kind preset is kept unchanged.
//! 3. Preset kinds absent from the caller set pass through whole.
//!
//! The result is the union of kinds, each appearing exactly once. No errors
//! are raised here; downstream validation catches structural problems in
//! the merged result.

use crate::policy::PolicyDefinition;

/// Merge caller-override policies over a preset set
///
/// Caller policies keep their relative order, followed by preset-only kinds
/// in preset order, so the outcome is deterministic for a given input.
pub fn merge_policy_sets(
    preset: Vec<PolicyDefinition>,
    overrides: Vec<PolicyDefinition>,
) -> Vec<PolicyDefinition> {
    let mut remaining = preset;
    let mut merged = Vec::with_capacity(remaining.len() + overrides.len());

    for caller in overrides {
        match remaining.iter().position(|p| p.kind() == caller.kind()) {
            Some(index) => {
                let from_preset = remaining.remove(index);
                merged.push(caller.merge(&from_preset));
            }
            None => merged.push(caller),
        }
    }

    // preset kinds the caller did not touch apply in full
    merged.extend(remaining);
    merged
}

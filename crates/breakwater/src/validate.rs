//! Structural validation of a finished policy set
//!
//! Pure function, no side effects, called once when a
//! [`ResiliencyOptions`](crate::options::ResiliencyOptions) is constructed
//! and never again per request. Violations fail fast at configuration time
//! with a [`ConfigurationError`] naming the invariant and the offending
//! orders/kinds; nothing is silently repaired.
//!
//! Invariants:
//! 1. No two policies share an order value.
//! 2. A custom policy cannot coexist with any other policy.
//! 3. A fallback requires a circuit breaker and must hold the maximum order
//!    among non-timeout policies.
//! 4. A fallback-on-break requires a circuit breaker; with a fallback
//!    present its order must be exactly one less, otherwise it must itself
//!    hold the maximum non-timeout order.
//! 5. An empty set is valid (the pipeline is a pass-through).

use crate::error::ConfigurationError;
use crate::policy::{PolicyDefinition, PolicyKind};

/// Check a policy set against the structural invariants
pub fn validate(policies: &[PolicyDefinition]) -> Result<(), ConfigurationError> {
    if policies.is_empty() {
        return Ok(());
    }

    check_parameters(policies)?;
    check_unique_orders(policies)?;
    check_custom_exclusivity(policies)?;
    check_fallback_placement(policies)?;

    Ok(())
}

fn check_parameters(policies: &[PolicyDefinition]) -> Result<(), ConfigurationError> {
    for policy in policies {
        match policy {
            PolicyDefinition::AttemptTimeout(def) | PolicyDefinition::OverallTimeout(def) => {
                if def.duration.is_zero() {
                    return Err(ConfigurationError::InvalidParameter {
                        field: "timeout duration",
                        message: "must be greater than zero".to_string(),
                    });
                }
            }
            PolicyDefinition::CircuitBreaker(def) => {
                if def.failure_threshold == 0 {
                    return Err(ConfigurationError::InvalidParameter {
                        field: "failure_threshold",
                        message: "must be greater than 0".to_string(),
                    });
                }
                if def.break_duration.is_zero() {
                    return Err(ConfigurationError::InvalidParameter {
                        field: "break_duration",
                        message: "must be greater than zero".to_string(),
                    });
                }
            }
            PolicyDefinition::Bulkhead(def) => {
                if def.max_parallelization == 0 {
                    return Err(ConfigurationError::InvalidParameter {
                        field: "max_parallelization",
                        message: "must be greater than 0".to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_unique_orders(policies: &[PolicyDefinition]) -> Result<(), ConfigurationError> {
    for (index, first) in policies.iter().enumerate() {
        for second in &policies[index + 1..] {
            if first.order() == second.order() {
                return Err(ConfigurationError::DuplicateOrder {
                    order: first.order(),
                    first: first.kind(),
                    second: second.kind(),
                });
            }
        }
    }
    Ok(())
}

fn check_custom_exclusivity(policies: &[PolicyDefinition]) -> Result<(), ConfigurationError> {
    let has_custom = policies.iter().any(|p| p.kind() == PolicyKind::Custom);
    if has_custom && policies.len() > 1 {
        return Err(ConfigurationError::MixedCustomPolicy { others: policies.len() - 1 });
    }
    Ok(())
}

fn check_fallback_placement(policies: &[PolicyDefinition]) -> Result<(), ConfigurationError> {
    let has_breaker = policies.iter().any(|p| p.kind() == PolicyKind::CircuitBreaker);
    let fallback = policies.iter().find(|p| p.kind() == PolicyKind::Fallback);
    let on_break = policies.iter().find(|p| p.kind() == PolicyKind::FallbackOnBreak);

    if let Some(fallback) = fallback {
        if !has_breaker {
            return Err(ConfigurationError::MissingCircuitBreaker { kind: PolicyKind::Fallback });
        }
        check_holds_max_order(policies, fallback)?;
    }

    if let Some(on_break) = on_break {
        if !has_breaker {
            return Err(ConfigurationError::MissingCircuitBreaker {
                kind: PolicyKind::FallbackOnBreak,
            });
        }
        match fallback {
            Some(fallback) => {
                if on_break.order() != fallback.order() - 1 {
                    return Err(ConfigurationError::FallbackOnBreakNotAdjacent {
                        on_break_order: on_break.order(),
                        fallback_order: fallback.order(),
                    });
                }
            }
            None => check_holds_max_order(policies, on_break)?,
        }
    }

    Ok(())
}

/// The fallback family must run last among the non-timeout layers
fn check_holds_max_order(
    policies: &[PolicyDefinition],
    subject: &PolicyDefinition,
) -> Result<(), ConfigurationError> {
    if let Some(offender) = policies
        .iter()
        .find(|p| !p.kind().is_timeout() && p.order() > subject.order())
    {
        return Err(ConfigurationError::FallbackNotLast {
            kind: subject.kind(),
            order: subject.order(),
            other: offender.kind(),
            other_order: offender.order(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pipeline::{ExecutionContext, Next, PolicyResult};
    use crate::policy::{
        order, BulkheadDefinition, CircuitBreakerDefinition, CustomDefinition, FallbackDefinition,
        FallbackOnBreakDefinition, RetryDefinition, TimeoutDefinition,
    };
    use crate::request::PipelineResponse;

    fn fallback() -> FallbackDefinition {
        FallbackDefinition::new(|_, _| {
            Box::pin(async { PipelineResponse::new(http::StatusCode::OK) })
        })
    }

    fn fallback_on_break() -> FallbackOnBreakDefinition {
        FallbackOnBreakDefinition::new(|_, _| {
            Box::pin(async { PipelineResponse::new(http::StatusCode::OK) })
        })
    }

    fn custom() -> CustomDefinition {
        struct Short;
        #[async_trait::async_trait]
        impl crate::pipeline::PolicyLayer for Short {
            async fn execute(&self, _ctx: ExecutionContext, _next: Next) -> PolicyResult {
                Ok(PipelineResponse::new(http::StatusCode::OK))
            }
        }
        CustomDefinition::new(|| Arc::new(Short))
    }

    /// Validates that the empty set skips validation entirely.
    #[test]
    fn test_empty_set_is_valid() {
        assert!(validate(&[]).is_ok());
    }

    /// Validates duplicate-order rejection, with both kinds and the shared
    /// order named in the error.
    #[test]
    fn test_duplicate_orders_rejected() {
        let policies = [
            PolicyDefinition::Retry(RetryDefinition::new().order(3)),
            PolicyDefinition::Bulkhead(BulkheadDefinition::new().order(3)),
        ];
        let error = validate(&policies).expect_err("duplicate orders");
        match error {
            ConfigurationError::DuplicateOrder { order, first, second } => {
                assert_eq!(order, 3);
                assert_eq!(first, PolicyKind::Retry);
                assert_eq!(second, PolicyKind::Bulkhead);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Validates custom exclusivity: a custom policy alone passes, combined
    /// with anything else it fails; a set of only built-ins passes.
    #[test]
    fn test_custom_exclusivity() {
        assert!(validate(&[PolicyDefinition::Custom(custom())]).is_ok());

        let mixed = [
            PolicyDefinition::Custom(custom().order(9)),
            PolicyDefinition::Retry(RetryDefinition::new()),
        ];
        assert!(matches!(
            validate(&mixed),
            Err(ConfigurationError::MixedCustomPolicy { others: 1 })
        ));

        let builtins = [
            PolicyDefinition::Retry(RetryDefinition::new()),
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
        ];
        assert!(validate(&builtins).is_ok());
    }

    /// Validates fallback placement: a fallback without a circuit breaker
    /// fails; a fallback not holding the maximum order fails; the canonical
    /// arrangement passes.
    #[test]
    fn test_fallback_placement() {
        let lonely = [PolicyDefinition::Fallback(fallback())];
        assert!(matches!(
            validate(&lonely),
            Err(ConfigurationError::MissingCircuitBreaker { kind: PolicyKind::Fallback })
        ));

        let misplaced = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new().order(9)),
            PolicyDefinition::Fallback(fallback()),
        ];
        assert!(matches!(validate(&misplaced), Err(ConfigurationError::FallbackNotLast { .. })));

        let canonical = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            PolicyDefinition::Fallback(fallback()),
        ];
        assert!(validate(&canonical).is_ok());
    }

    /// Validates that an overall timeout ordered after the fallback is
    /// tolerated: the maximum-order rule covers non-timeout layers only.
    #[test]
    fn test_fallback_max_order_ignores_timeouts() {
        let policies = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            PolicyDefinition::Fallback(fallback()),
            PolicyDefinition::OverallTimeout(TimeoutDefinition::overall()),
        ];
        assert!(validate(&policies).is_ok());
    }

    /// Validates fallback-on-break placement: it requires a circuit breaker,
    /// must immediately precede a fallback when both are present, and must
    /// hold the maximum non-timeout order when alone.
    #[test]
    fn test_fallback_on_break_placement() {
        let lonely = [PolicyDefinition::FallbackOnBreak(fallback_on_break())];
        assert!(matches!(
            validate(&lonely),
            Err(ConfigurationError::MissingCircuitBreaker { kind: PolicyKind::FallbackOnBreak })
        ));

        let adjacent = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            PolicyDefinition::FallbackOnBreak(fallback_on_break()),
            PolicyDefinition::Fallback(fallback()),
        ];
        assert!(validate(&adjacent).is_ok());

        let gapped = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            PolicyDefinition::FallbackOnBreak(fallback_on_break().order(2)),
            PolicyDefinition::Fallback(fallback()),
        ];
        assert!(matches!(
            validate(&gapped),
            Err(ConfigurationError::FallbackOnBreakNotAdjacent {
                on_break_order: 2,
                fallback_order: order::FALLBACK,
            })
        ));

        let alone_last = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new()),
            PolicyDefinition::FallbackOnBreak(fallback_on_break().order(order::FALLBACK)),
        ];
        assert!(validate(&alone_last).is_ok());

        let alone_misplaced = [
            PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new().order(9)),
            PolicyDefinition::FallbackOnBreak(fallback_on_break()),
        ];
        assert!(matches!(
            validate(&alone_misplaced),
            Err(ConfigurationError::FallbackNotLast { .. })
        ));
    }

    /// Validates parameter checks: zero thresholds and zero durations are
    /// rejected at configuration time.
    #[test]
    fn test_parameter_validation() {
        let zero_threshold =
            [PolicyDefinition::CircuitBreaker(CircuitBreakerDefinition::new().failure_threshold(0))];
        assert!(matches!(
            validate(&zero_threshold),
            Err(ConfigurationError::InvalidParameter { field: "failure_threshold", .. })
        ));

        let zero_slots =
            [PolicyDefinition::Bulkhead(BulkheadDefinition::new().max_parallelization(0))];
        assert!(matches!(
            validate(&zero_slots),
            Err(ConfigurationError::InvalidParameter { field: "max_parallelization", .. })
        ));

        let zero_timeout = [PolicyDefinition::AttemptTimeout(
            TimeoutDefinition::attempt().duration(std::time::Duration::ZERO),
        )];
        assert!(matches!(
            validate(&zero_timeout),
            Err(ConfigurationError::InvalidParameter { field: "timeout duration", .. })
        ));
    }
}

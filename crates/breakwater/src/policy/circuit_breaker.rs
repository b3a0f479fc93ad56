//! Circuit breaker policy
//!
//! Prevents cascading failures by fast-failing calls to a dependency that
//! keeps failing. State machine: Closed -> Open -> HalfOpen -> Closed.
//!
//! Closed counts consecutive failures (per the configured predicate;
//! default: any transient error, or a non-success status) against
//! `failure_threshold`. Reaching the threshold opens the circuit for
//! `break_duration`, during which every call is rejected without touching
//! the transport and the break event fires. After the break elapses the
//! breaker moves to half-open and admits exactly one trial call: success
//! closes the circuit (firing one reset event), failure re-opens it.
//!
//! Breaker state is shared by every concurrent call to the same pipeline.
//! All transitions go through a single mutex-guarded cell so concurrent
//! failures cannot double-trip the breaker or race a reset.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::events::{self, PipelineEvents};
use crate::pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult};
use crate::policy::BreakPredicate;
use crate::request::Outcome;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a single trial request
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for a circuit breaker policy
#[derive(Clone, Serialize, Deserialize)]
pub struct CircuitBreakerDefinition {
    /// Chain position
    #[serde(default = "defaults::order")]
    pub order: i32,
    /// Consecutive failures before the circuit opens
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    #[serde(with = "crate::serde_util::duration_millis", default = "defaults::break_duration")]
    pub break_duration: Duration,
    /// Explicit failure predicate, replacing the default classification
    #[serde(skip)]
    pub should_break: Option<BreakPredicate>,
}

mod defaults {
    use std::time::Duration;

    pub(super) fn order() -> i32 {
        crate::policy::order::CIRCUIT_BREAKER
    }

    pub(super) fn failure_threshold() -> u32 {
        5
    }

    pub(super) fn break_duration() -> Duration {
        Duration::from_secs(30)
    }
}

impl Default for CircuitBreakerDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerDefinition {
    /// A circuit breaker definition with the documented defaults
    pub fn new() -> Self {
        Self {
            order: defaults::order(),
            failure_threshold: defaults::failure_threshold(),
            break_duration: defaults::break_duration(),
            should_break: None,
        }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Override the failure threshold
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Override the break duration
    #[must_use]
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Install an explicit failure predicate
    #[must_use]
    pub fn should_break(
        mut self,
        predicate: impl Fn(Outcome<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_break = Some(Arc::new(predicate));
        self
    }

    /// Merge this (caller) definition over a preset, field by field
    pub(crate) fn merge(self, preset: &Self) -> Self {
        Self {
            order: if self.order == defaults::order() { preset.order } else { self.order },
            failure_threshold: if self.failure_threshold == defaults::failure_threshold() {
                preset.failure_threshold
            } else {
                self.failure_threshold
            },
            break_duration: if self.break_duration == defaults::break_duration() {
                preset.break_duration
            } else {
                self.break_duration
            },
            should_break: self.should_break.or_else(|| preset.should_break.clone()),
        }
    }
}

impl fmt::Debug for CircuitBreakerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerDefinition")
            .field("order", &self.order)
            .field("failure_threshold", &self.failure_threshold)
            .field("break_duration", &self.break_duration)
            .field("should_break", &self.should_break.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Default failure classification: any error, or a non-success status
///
/// Rejections and cancellation are classified as neutral by the layer before
/// the predicate runs; they never reach it.
pub(crate) fn default_should_break(outcome: Outcome<'_>) -> bool {
    match outcome {
        Outcome::Error(_) => true,
        Outcome::Response(response) => !response.is_success(),
    }
}

/// Admission decision for one call
enum Admission {
    /// Circuit closed, proceed normally
    Normal,
    /// Half-open trial call
    Trial,
}

/// State transition produced by recording an outcome
enum Transition {
    None,
    Opened,
    Reset,
}

/// Mutable breaker state, guarded by one lock for linearizable transitions
struct BreakerCell {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Runnable circuit breaker layer holding the shared state
pub(crate) struct CircuitBreakerLayer {
    failure_threshold: u32,
    break_duration: Duration,
    should_break: BreakPredicate,
    cell: Mutex<BreakerCell>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn PipelineEvents>,
}

impl CircuitBreakerLayer {
    pub(crate) fn new(
        def: &CircuitBreakerDefinition,
        events: Arc<dyn PipelineEvents>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let should_break =
            def.should_break.clone().unwrap_or_else(|| Arc::new(default_should_break));
        Self {
            failure_threshold: def.failure_threshold,
            break_duration: def.break_duration,
            should_break,
            cell: Mutex::new(BreakerCell {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            clock,
            events,
        }
    }

    /// The current circuit state (open transitions to half-open lazily)
    pub(crate) fn state(&self) -> CircuitState {
        self.cell.lock().state
    }

    /// Decide whether this call may proceed
    fn try_admit(&self) -> Result<Admission, PipelineError> {
        let mut cell = self.cell.lock();
        match cell.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = cell
                    .opened_at
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.break_duration {
                    cell.state = CircuitState::HalfOpen;
                    cell.trial_in_flight = true;
                    debug!("circuit breaker half-open, admitting trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(PipelineError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if cell.trial_in_flight {
                    Err(PipelineError::CircuitOpen)
                } else {
                    cell.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    /// Record a classified outcome; returns the transition to report
    fn record(&self, failure: bool) -> Transition {
        let mut cell = self.cell.lock();
        match cell.state {
            CircuitState::Closed => {
                if failure {
                    cell.consecutive_failures += 1;
                    if cell.consecutive_failures >= self.failure_threshold {
                        self.open(&mut cell);
                        return Transition::Opened;
                    }
                } else {
                    cell.consecutive_failures = 0;
                }
                Transition::None
            }
            CircuitState::HalfOpen => {
                cell.trial_in_flight = false;
                if failure {
                    self.open(&mut cell);
                    Transition::Opened
                } else {
                    cell.state = CircuitState::Closed;
                    cell.consecutive_failures = 0;
                    cell.opened_at = None;
                    Transition::Reset
                }
            }
            // stale completion from before the break; nothing to do
            CircuitState::Open => Transition::None,
        }
    }

    /// Release a half-open trial slot without counting the outcome
    fn release_trial(&self) {
        let mut cell = self.cell.lock();
        if cell.state == CircuitState::HalfOpen {
            cell.trial_in_flight = false;
        }
    }

    fn open(&self, cell: &mut BreakerCell) {
        cell.state = CircuitState::Open;
        cell.opened_at = Some(self.clock.now());
        cell.trial_in_flight = false;
        warn!(failures = cell.consecutive_failures, "circuit breaker opened");
    }
}

#[async_trait]
impl PolicyLayer for CircuitBreakerLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        if let Err(rejected) = self.try_admit() {
            debug!("circuit breaker rejecting call");
            return Err(rejected);
        }

        let result = next.run(ctx.clone()).await;

        // cancellation and admission rejections are neutral: they release a
        // trial slot but neither trip nor reset the breaker
        let classified = match &result {
            Err(error) if error.is_cancellation() || error.is_rejection() => None,
            Ok(response) => Some((Outcome::Response(response), None)),
            Err(error) => Some((Outcome::Error(error), Some(error))),
        };

        match classified {
            None => self.release_trial(),
            Some((outcome, error)) => {
                let failure = (self.should_break)(outcome);
                match self.record(failure) {
                    Transition::Opened => {
                        events::emit("on_circuit_break", || {
                            self.events.on_circuit_break(ctx.request(), error);
                        });
                    }
                    Transition::Reset => {
                        events::emit("on_circuit_reset", || {
                            self.events.on_circuit_reset(ctx.request());
                        });
                    }
                    Transition::None => {}
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::events::TracingEvents;

    fn layer_with_clock(threshold: u32, break_duration: Duration) -> (CircuitBreakerLayer, MockClock) {
        let clock = MockClock::new();
        let def = CircuitBreakerDefinition::new()
            .failure_threshold(threshold)
            .break_duration(break_duration);
        let layer =
            CircuitBreakerLayer::new(&def, Arc::new(TracingEvents), Arc::new(clock.clone()));
        (layer, clock)
    }

    /// Validates merge precedence for the circuit breaker definition.
    #[test]
    fn test_merge_precedence() {
        let preset = CircuitBreakerDefinition::new()
            .failure_threshold(10)
            .break_duration(Duration::from_secs(5));

        let merged = CircuitBreakerDefinition::new().failure_threshold(2).merge(&preset);
        assert_eq!(merged.failure_threshold, 2);
        assert_eq!(merged.break_duration, Duration::from_secs(5));
    }

    /// Validates the full state machine against a mock clock:
    ///
    /// # Test Steps
    /// 1. Record `failure_threshold` consecutive failures; circuit opens
    /// 2. Admission is rejected while the break duration has not elapsed
    /// 3. Advance the clock past the break; one trial call is admitted
    /// 4. A concurrent call during the trial is rejected
    /// 5. The trial's success closes the circuit with a reset transition
    #[test]
    fn test_state_machine_transitions() {
        let (layer, clock) = layer_with_clock(2, Duration::from_secs(30));
        assert_eq!(layer.state(), CircuitState::Closed);

        assert!(matches!(layer.record(true), Transition::None));
        assert!(matches!(layer.record(true), Transition::Opened));
        assert_eq!(layer.state(), CircuitState::Open);

        assert!(layer.try_admit().is_err());

        clock.advance(Duration::from_secs(30));
        assert!(matches!(layer.try_admit(), Ok(Admission::Trial)));
        assert_eq!(layer.state(), CircuitState::HalfOpen);

        // second caller while the trial is in flight
        assert!(layer.try_admit().is_err());

        assert!(matches!(layer.record(false), Transition::Reset));
        assert_eq!(layer.state(), CircuitState::Closed);
    }

    /// Validates that a failed half-open trial re-opens the circuit and the
    /// break timer restarts from the trial's failure.
    #[test]
    fn test_half_open_failure_reopens() {
        let (layer, clock) = layer_with_clock(1, Duration::from_secs(10));

        assert!(matches!(layer.record(true), Transition::Opened));
        clock.advance(Duration::from_secs(10));
        assert!(layer.try_admit().is_ok());

        assert!(matches!(layer.record(true), Transition::Opened));
        assert!(layer.try_admit().is_err());

        clock.advance(Duration::from_secs(10));
        assert!(layer.try_admit().is_ok());
    }

    /// Validates that a success in closed state resets the consecutive
    /// failure count.
    #[test]
    fn test_success_resets_failure_streak() {
        let (layer, _clock) = layer_with_clock(2, Duration::from_secs(10));

        assert!(matches!(layer.record(true), Transition::None));
        assert!(matches!(layer.record(false), Transition::None));
        assert!(matches!(layer.record(true), Transition::None));
        assert_eq!(layer.state(), CircuitState::Closed);
    }

    /// Validates that releasing a trial slot after a neutral outcome keeps
    /// the circuit half-open and re-admits a new trial.
    #[test]
    fn test_neutral_outcome_releases_trial() {
        let (layer, clock) = layer_with_clock(1, Duration::from_secs(10));

        assert!(matches!(layer.record(true), Transition::Opened));
        clock.advance(Duration::from_secs(10));
        assert!(layer.try_admit().is_ok());

        layer.release_trial();
        assert_eq!(layer.state(), CircuitState::HalfOpen);
        assert!(layer.try_admit().is_ok());
    }

    /// Validates the default failure classification: errors and non-success
    /// statuses count, success statuses do not.
    #[test]
    fn test_default_should_break() {
        use http::StatusCode;

        use crate::request::PipelineResponse;

        let error = PipelineError::Timeout { timeout: Duration::from_secs(1) };
        assert!(default_should_break(Outcome::Error(&error)));

        let failure = PipelineResponse::new(StatusCode::BAD_GATEWAY);
        assert!(default_should_break(Outcome::Response(&failure)));

        let success = PipelineResponse::new(StatusCode::OK);
        assert!(!default_should_break(Outcome::Response(&success)));
    }
}

//! Retry policy with backoff, jitter and Retry-After support
//!
//! For attempts `1..=retry_count` the layer evaluates the outcome against
//! the retry predicate (an explicit override, or the default: transient
//! pipeline errors, or a status in {408, 429, 502, 503, 504}, plus 500 when
//! `retry_on_500` is set). Rejections and cancellation are intentional
//! fast-fail signals and are never retried regardless of predicate.
//!
//! The next delay is the response's `Retry-After` value when present and
//! respected (capped by `max_retry_after`), otherwise the backoff sequence:
//! the fixed `delay` repeated, or decorrelated-jitter increasing delays when
//! `use_jitter` is on. Delay waits observe the request's cancellation token.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::events::{self, PipelineEvents};
use crate::pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult};
use crate::policy::RetryPredicate;
use crate::request::Outcome;

/// Configuration for a retry policy
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryDefinition {
    /// Chain position
    #[serde(default = "defaults::order")]
    pub order: i32,
    /// Maximum number of retries after the initial attempt
    #[serde(default = "defaults::retry_count")]
    pub retry_count: u32,
    /// Base delay between attempts
    #[serde(with = "crate::serde_util::duration_millis", default = "defaults::delay")]
    pub delay: Duration,
    /// Use decorrelated-jitter increasing delays instead of the fixed delay
    #[serde(default)]
    pub use_jitter: bool,
    /// Also retry POST/PUT/PATCH/DELETE requests. Merged by logical OR.
    #[serde(default)]
    pub apply_to_non_idempotent: bool,
    /// Treat status 500 as retryable. Merged by logical OR.
    #[serde(default)]
    pub retry_on_500: bool,
    /// Honor the server's `Retry-After` header when computing the delay
    #[serde(default = "defaults::respect_retry_after")]
    pub respect_retry_after: bool,
    /// Upper bound applied to `Retry-After` values and jittered delays
    #[serde(with = "crate::serde_util::duration_millis_opt", default = "defaults::max_retry_after")]
    pub max_retry_after: Option<Duration>,
    /// Explicit retry predicate, replacing the default classification
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
}

mod defaults {
    use std::time::Duration;

    pub(super) fn order() -> i32 {
        crate::policy::order::RETRY
    }

    pub(super) fn retry_count() -> u32 {
        3
    }

    pub(super) fn delay() -> Duration {
        Duration::from_secs(2)
    }

    pub(super) fn respect_retry_after() -> bool {
        true
    }

    pub(super) fn max_retry_after() -> Option<Duration> {
        Some(Duration::from_secs(60))
    }
}

impl Default for RetryDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryDefinition {
    /// A retry definition with the documented defaults
    pub fn new() -> Self {
        Self {
            order: defaults::order(),
            retry_count: defaults::retry_count(),
            delay: defaults::delay(),
            use_jitter: false,
            apply_to_non_idempotent: false,
            retry_on_500: false,
            respect_retry_after: defaults::respect_retry_after(),
            max_retry_after: defaults::max_retry_after(),
            should_retry: None,
        }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Override the retry count
    #[must_use]
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Override the base delay
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enable decorrelated-jitter delays
    #[must_use]
    pub fn use_jitter(mut self, jitter: bool) -> Self {
        self.use_jitter = jitter;
        self
    }

    /// Allow retries for non-idempotent methods
    #[must_use]
    pub fn apply_to_non_idempotent(mut self, apply: bool) -> Self {
        self.apply_to_non_idempotent = apply;
        self
    }

    /// Treat status 500 as retryable
    #[must_use]
    pub fn retry_on_500(mut self, retry: bool) -> Self {
        self.retry_on_500 = retry;
        self
    }

    /// Toggle `Retry-After` handling
    #[must_use]
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Override the `Retry-After` / jitter cap
    #[must_use]
    pub fn max_retry_after(mut self, cap: Option<Duration>) -> Self {
        self.max_retry_after = cap;
        self
    }

    /// Install an explicit retry predicate
    #[must_use]
    pub fn should_retry(
        mut self,
        predicate: impl Fn(Outcome<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Merge this (caller) definition over a preset, field by field
    pub(crate) fn merge(self, preset: &Self) -> Self {
        Self {
            order: if self.order == defaults::order() { preset.order } else { self.order },
            retry_count: if self.retry_count == defaults::retry_count() {
                preset.retry_count
            } else {
                self.retry_count
            },
            delay: if self.delay == defaults::delay() { preset.delay } else { self.delay },
            use_jitter: self.use_jitter || preset.use_jitter,
            apply_to_non_idempotent: self.apply_to_non_idempotent
                || preset.apply_to_non_idempotent,
            retry_on_500: self.retry_on_500 || preset.retry_on_500,
            respect_retry_after: if self.respect_retry_after == defaults::respect_retry_after() {
                preset.respect_retry_after
            } else {
                self.respect_retry_after
            },
            max_retry_after: if self.max_retry_after == defaults::max_retry_after() {
                preset.max_retry_after
            } else {
                self.max_retry_after
            },
            should_retry: self.should_retry.or_else(|| preset.should_retry.clone()),
        }
    }
}

impl fmt::Debug for RetryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDefinition")
            .field("order", &self.order)
            .field("retry_count", &self.retry_count)
            .field("delay", &self.delay)
            .field("use_jitter", &self.use_jitter)
            .field("apply_to_non_idempotent", &self.apply_to_non_idempotent)
            .field("retry_on_500", &self.retry_on_500)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("max_retry_after", &self.max_retry_after)
            .field("should_retry", &self.should_retry.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Default outcome classification used when no explicit predicate is set
pub(crate) fn default_should_retry(outcome: Outcome<'_>, retry_on_500: bool) -> bool {
    match outcome {
        Outcome::Error(error) => error.is_retryable_by_default(),
        Outcome::Response(response) => {
            matches!(response.status().as_u16(), 408 | 429 | 502 | 503 | 504)
                || (retry_on_500 && response.status().as_u16() == 500)
        }
    }
}

/// Backoff state for one retried execution
///
/// Fixed mode repeats the base delay. Jitter mode draws each delay from
/// `[base, 3 x previous)` (decorrelated jitter): randomized enough to avoid
/// retry storms, with a non-decreasing expected delay, bounded by the
/// configured cap.
pub(crate) struct BackoffSchedule {
    base: Duration,
    cap: Option<Duration>,
    use_jitter: bool,
    prev: Duration,
}

impl BackoffSchedule {
    pub(crate) fn new(base: Duration, cap: Option<Duration>, use_jitter: bool) -> Self {
        Self { base, cap, use_jitter, prev: base }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = if self.use_jitter {
            let base_ms = self.base.as_millis() as u64;
            let hi = (self.prev.as_millis() as u64).saturating_mul(3).max(base_ms + 1);
            Duration::from_millis(rand::thread_rng().gen_range(base_ms..hi))
        } else {
            self.base
        };
        let capped = match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        };
        self.prev = capped.max(self.base);
        capped
    }
}

/// Runnable retry layer
pub(crate) struct RetryLayer {
    retry_count: u32,
    delay: Duration,
    use_jitter: bool,
    respect_retry_after: bool,
    max_retry_after: Option<Duration>,
    should_retry: RetryPredicate,
    events: Arc<dyn PipelineEvents>,
}

impl RetryLayer {
    pub(crate) fn new(def: &RetryDefinition, events: Arc<dyn PipelineEvents>) -> Self {
        let should_retry = def.should_retry.clone().unwrap_or_else(|| {
            let retry_on_500 = def.retry_on_500;
            Arc::new(move |outcome| default_should_retry(outcome, retry_on_500))
        });
        Self {
            retry_count: def.retry_count,
            delay: def.delay,
            use_jitter: def.use_jitter,
            respect_retry_after: def.respect_retry_after,
            max_retry_after: def.max_retry_after,
            should_retry,
            events,
        }
    }

    /// Whether an outcome should be retried; fast-fail signals never are
    fn is_retryable(&self, result: &PolicyResult) -> bool {
        match result {
            Ok(response) => (self.should_retry)(Outcome::Response(response)),
            Err(error) if error.is_cancellation() || error.is_rejection() => false,
            Err(error) => (self.should_retry)(Outcome::Error(error)),
        }
    }

    /// The delay before the next attempt: `Retry-After` wins over backoff
    fn delay_for(&self, result: &PolicyResult, backoff: &mut BackoffSchedule) -> Duration {
        let retry_after = match result {
            Ok(response) if self.respect_retry_after => response.retry_after(),
            _ => None,
        };
        match retry_after {
            Some(requested) => match self.max_retry_after {
                Some(cap) => requested.min(cap),
                None => requested,
            },
            None => backoff.next_delay(),
        }
    }
}

#[async_trait]
impl PolicyLayer for RetryLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        let mut backoff = BackoffSchedule::new(self.delay, self.max_retry_after, self.use_jitter);
        let mut attempt: u32 = 0;

        loop {
            let result = next.clone().run(ctx.clone()).await;
            attempt += 1;

            if attempt > self.retry_count || !self.is_retryable(&result) {
                return result;
            }

            let delay = self.delay_for(&result, &mut backoff);
            debug!(attempt, ?delay, "retrying request");
            events::emit("on_retry", || {
                self.events.on_retry(ctx.request(), attempt, result.as_ref().err());
            });

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancel().cancelled() => return Err(PipelineError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::events::TracingEvents;
    use crate::request::PipelineResponse;

    fn response(status: StatusCode) -> PipelineResponse {
        PipelineResponse::new(status)
    }

    /// Validates merge precedence: a caller's explicit `retry_count` wins
    /// over the preset's, and a caller value left at the default takes the
    /// preset's.
    #[test]
    fn test_merge_precedence() {
        let preset = RetryDefinition::new().retry_count(7);

        let overridden = RetryDefinition::new().retry_count(5).merge(&preset);
        assert_eq!(overridden.retry_count, 5);

        let untouched = RetryDefinition::new().merge(&preset);
        assert_eq!(untouched.retry_count, 7);
    }

    /// Validates OR-merge of allowance booleans: either source enabling
    /// `retry_on_500` or `apply_to_non_idempotent` is enough.
    #[test]
    fn test_merge_boolean_or() {
        let preset = RetryDefinition::new().retry_on_500(true);
        let merged = RetryDefinition::new().apply_to_non_idempotent(true).merge(&preset);

        assert!(merged.retry_on_500);
        assert!(merged.apply_to_non_idempotent);
    }

    /// Validates that a caller predicate survives the merge and that a
    /// preset predicate fills in when the caller has none.
    #[test]
    fn test_merge_predicate() {
        let preset = RetryDefinition::new().should_retry(|_| true);
        let merged = RetryDefinition::new().merge(&preset);
        assert!(merged.should_retry.is_some());
    }

    /// Validates the default retry classification: 408/429/502/503/504
    /// retry, 500 only with the allowance bit, 200 and 404 never.
    #[test]
    fn test_default_predicate_statuses() {
        for status in [408, 429, 502, 503, 504] {
            let resp = response(StatusCode::from_u16(status).expect("status"));
            assert!(default_should_retry(Outcome::Response(&resp), false), "{status} retries");
        }

        let server_error = response(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!default_should_retry(Outcome::Response(&server_error), false));
        assert!(default_should_retry(Outcome::Response(&server_error), true));

        assert!(!default_should_retry(Outcome::Response(&response(StatusCode::OK)), false));
        assert!(!default_should_retry(Outcome::Response(&response(StatusCode::NOT_FOUND)), false));
    }

    /// Validates that rejections and cancellation are never retried, even
    /// under a predicate that retries everything.
    #[test]
    fn test_fast_fail_signals_not_retried() {
        let def = RetryDefinition::new().should_retry(|_| true);
        let layer = RetryLayer::new(&def, Arc::new(TracingEvents));

        assert!(!layer.is_retryable(&Err(PipelineError::CircuitOpen)));
        assert!(!layer.is_retryable(&Err(PipelineError::BulkheadRejected {
            max_parallelization: 1,
            max_queuing: 0,
        })));
        assert!(!layer.is_retryable(&Err(PipelineError::Cancelled)));
    }

    /// Validates `Retry-After` precedence: a 2 s server request beats a 5 s
    /// computed backoff when respected and under the cap, is capped by
    /// `max_retry_after`, and is ignored when `respect_retry_after` is off.
    #[test]
    fn test_retry_after_precedence() {
        let throttled = response(StatusCode::TOO_MANY_REQUESTS)
            .with_header(http::header::RETRY_AFTER, http::HeaderValue::from_static("2"));
        let result: PolicyResult = Ok(throttled);

        let def = RetryDefinition::new().delay(Duration::from_secs(5));
        let layer = RetryLayer::new(&def, Arc::new(TracingEvents));
        let mut backoff = BackoffSchedule::new(Duration::from_secs(5), None, false);
        assert_eq!(layer.delay_for(&result, &mut backoff), Duration::from_secs(2));

        let capped_def = RetryDefinition::new().max_retry_after(Some(Duration::from_secs(1)));
        let capped = RetryLayer::new(&capped_def, Arc::new(TracingEvents));
        let mut backoff = BackoffSchedule::new(Duration::from_secs(5), None, false);
        assert_eq!(capped.delay_for(&result, &mut backoff), Duration::from_secs(1));

        let deaf_def =
            RetryDefinition::new().delay(Duration::from_secs(5)).respect_retry_after(false);
        let deaf = RetryLayer::new(&deaf_def, Arc::new(TracingEvents));
        let mut backoff = BackoffSchedule::new(Duration::from_secs(5), None, false);
        assert_eq!(deaf.delay_for(&result, &mut backoff), Duration::from_secs(5));
    }

    /// Validates the backoff envelope: fixed mode repeats the base delay;
    /// jitter mode stays within `[base, 3 x previous)` and under the cap.
    #[test]
    fn test_backoff_envelope() {
        let mut fixed = BackoffSchedule::new(Duration::from_millis(50), None, false);
        assert_eq!(fixed.next_delay(), Duration::from_millis(50));
        assert_eq!(fixed.next_delay(), Duration::from_millis(50));

        let base = Duration::from_millis(50);
        let cap = Duration::from_millis(400);
        let mut jittered = BackoffSchedule::new(base, Some(cap), true);
        let mut prev = base;
        for _ in 0..16 {
            let delay = jittered.next_delay();
            assert!(delay >= base.min(cap));
            assert!(delay <= cap);
            assert!(delay.as_millis() < (prev.as_millis() * 3).max(base.as_millis() + 1));
            prev = delay.max(base);
        }
    }

    /// Validates deserialization of a retry definition from TOML with the
    /// documented defaults filled in.
    #[test]
    fn test_retry_deserialize() {
        let def: RetryDefinition =
            toml::from_str("retry_count = 5\nuse_jitter = true").expect("parse");
        assert_eq!(def.retry_count, 5);
        assert!(def.use_jitter);
        assert_eq!(def.delay, Duration::from_secs(2));
        assert!(def.respect_retry_after);
        assert_eq!(def.max_retry_after, Some(Duration::from_secs(60)));
        assert!(def.should_retry.is_none());
    }
}

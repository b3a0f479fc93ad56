//! Timeout policy: per-attempt or overall, optimistic or pessimistic
//!
//! The same definition shape serves both timeout positions; the chain
//! position (order) decides whether it bounds one transport attempt or the
//! whole execution.
//!
//! Strategy semantics:
//! - **Optimistic**: the timer shares a cancellation token with the inner
//!   call. When the timer wins, the token is cancelled and the call's
//!   cooperative unwind is awaited before the timeout outcome is returned.
//! - **Pessimistic**: the timer races a detached inner execution. When the
//!   timer wins, the timeout outcome is returned immediately without waiting
//!   for the call, and the `timeout_fired` marker is set so the executor can
//!   tear down the abandoned work.

use std::panic::resume_unwind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::events::{self, PipelineEvents};
use crate::pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult};
use crate::policy::order;

/// How a timeout policy treats the in-flight call when the timer wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    /// Share a cancellation token with the call and await its unwind
    #[default]
    Optimistic,
    /// Race the call against the timer and abandon it when the timer wins
    Pessimistic,
}

/// Configuration for a timeout policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutDefinition {
    /// Chain position; defaults to the per-attempt slot
    #[serde(default = "defaults::attempt_order")]
    pub order: i32,
    /// How long to wait before abandoning the call
    #[serde(with = "crate::serde_util::duration_millis", default = "defaults::attempt_duration")]
    pub duration: Duration,
    /// Timer strategy
    #[serde(default)]
    pub strategy: TimeoutStrategy,
    /// Cancel the abandoned attempt's token the moment a pessimistic timer
    /// fires, instead of leaving teardown to the executor. Merged by logical
    /// OR: either source enabling it is enough.
    #[serde(default)]
    pub cancel_in_flight: bool,
}

mod defaults {
    use std::time::Duration;

    use crate::policy::order;

    pub(super) fn attempt_order() -> i32 {
        order::ATTEMPT_TIMEOUT
    }

    pub(super) fn attempt_duration() -> Duration {
        Duration::from_secs(2)
    }

    pub(super) fn overall_duration() -> Duration {
        Duration::from_secs(30)
    }
}

impl TimeoutDefinition {
    /// A per-attempt timeout at its canonical position (2 s, optimistic)
    pub fn attempt() -> Self {
        Self {
            order: order::ATTEMPT_TIMEOUT,
            duration: defaults::attempt_duration(),
            strategy: TimeoutStrategy::default(),
            cancel_in_flight: false,
        }
    }

    /// An overall timeout at its canonical position (30 s, optimistic)
    pub fn overall() -> Self {
        Self {
            order: order::OVERALL_TIMEOUT,
            duration: defaults::overall_duration(),
            strategy: TimeoutStrategy::default(),
            cancel_in_flight: false,
        }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Override the timeout duration
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Override the timer strategy
    #[must_use]
    pub fn strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Cancel abandoned pessimistic work immediately
    #[must_use]
    pub fn cancel_in_flight(mut self, cancel: bool) -> Self {
        self.cancel_in_flight = cancel;
        self
    }

    /// Merge this (caller) definition over a preset, field by field
    ///
    /// `defaults` is the canonical definition for the timeout position being
    /// merged, used to detect fields the caller left untouched.
    pub(crate) fn merge(self, preset: &Self, defaults: &Self) -> Self {
        Self {
            order: if self.order == defaults.order { preset.order } else { self.order },
            duration: if self.duration == defaults.duration {
                preset.duration
            } else {
                self.duration
            },
            strategy: if self.strategy == defaults.strategy {
                preset.strategy
            } else {
                self.strategy
            },
            cancel_in_flight: self.cancel_in_flight || preset.cancel_in_flight,
        }
    }
}

/// Runnable timeout layer
pub(crate) struct TimeoutLayer {
    duration: Duration,
    strategy: TimeoutStrategy,
    cancel_in_flight: bool,
    events: Arc<dyn PipelineEvents>,
}

impl TimeoutLayer {
    pub(crate) fn new(def: &TimeoutDefinition, events: Arc<dyn PipelineEvents>) -> Self {
        Self {
            duration: def.duration,
            strategy: def.strategy,
            cancel_in_flight: def.cancel_in_flight,
            events,
        }
    }

    async fn run_optimistic(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        let linked = ctx.cancel().child_token();
        let inner_ctx = ctx.with_cancel(linked.clone());

        let fut = next.run(inner_ctx);
        tokio::pin!(fut);

        tokio::select! {
            result = &mut fut => result,
            () = tokio::time::sleep(self.duration) => {
                debug!(timeout = ?self.duration, "optimistic timeout fired, cancelling call");
                linked.cancel();
                // cooperative unwind: the call observes the shared token
                let _ = fut.await;
                events::emit("on_timeout", || self.events.on_timeout(ctx.request(), self.duration));
                Err(PipelineError::Timeout { timeout: self.duration })
            }
        }
    }

    async fn run_pessimistic(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        let attempt_token = ctx.cancel().child_token();
        let inner_ctx = ctx.with_cancel(attempt_token.clone());

        let mut handle = tokio::spawn(next.run(inner_ctx));

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => resume_unwind(join_error.into_panic()),
                Err(_) => Err(PipelineError::Cancelled),
            },
            () = tokio::time::sleep(self.duration) => {
                debug!(timeout = ?self.duration, "pessimistic timeout fired, abandoning call");
                ctx.mark_timeout_fired();
                if self.cancel_in_flight {
                    attempt_token.cancel();
                }
                events::emit("on_timeout", || self.events.on_timeout(ctx.request(), self.duration));
                // handle is dropped here, detaching the in-flight call; the
                // executor tears it down through the request-scoped token
                Err(PipelineError::Timeout { timeout: self.duration })
            }
        }
    }
}

#[async_trait]
impl PolicyLayer for TimeoutLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        match self.strategy {
            TimeoutStrategy::Optimistic => self.run_optimistic(ctx, next).await,
            TimeoutStrategy::Pessimistic => self.run_pessimistic(ctx, next).await,
        }
    }
}

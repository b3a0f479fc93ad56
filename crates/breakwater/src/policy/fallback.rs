//! Fallback policies substituting a response for a failed call
//!
//! `Fallback` substitutes for any error outcome except cancellation;
//! `FallbackOnBreak` substitutes only when the circuit breaker rejected the
//! call. Both sit outside the breaker in the canonical ordering so its
//! fast-fail rejections propagate to them. Cancellation is never
//! substituted: it stays a distinct outcome for the caller.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::events::{self, PipelineEvents};
use crate::pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult};
use crate::policy::{order, FallbackAction};
use crate::request::{PipelineRequest, PipelineResponse};

/// Configuration for a general fallback policy
#[derive(Clone)]
pub struct FallbackDefinition {
    /// Chain position
    pub order: i32,
    /// Action producing the substitute response
    pub fallback_action: FallbackAction,
}

impl FallbackDefinition {
    /// A fallback at its canonical position with the given action
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&PipelineRequest, &PipelineError) -> futures::future::BoxFuture<'static, PipelineResponse>
            + Send
            + Sync
            + 'static,
    {
        Self { order: order::FALLBACK, fallback_action: Arc::new(action) }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Merge this (caller) definition over a preset
    ///
    /// Actions are not comparable to a default; the caller's is always kept.
    pub(crate) fn merge(self, preset: &Self) -> Self {
        Self {
            order: if self.order == order::FALLBACK { preset.order } else { self.order },
            fallback_action: self.fallback_action,
        }
    }
}

impl fmt::Debug for FallbackDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDefinition")
            .field("order", &self.order)
            .field("fallback_action", &"<action>")
            .finish()
    }
}

/// Configuration for a fallback-on-break policy
#[derive(Clone)]
pub struct FallbackOnBreakDefinition {
    /// Chain position
    pub order: i32,
    /// Action producing the substitute response when the circuit is open
    pub on_break_action: FallbackAction,
}

impl FallbackOnBreakDefinition {
    /// A fallback-on-break at its canonical position with the given action
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&PipelineRequest, &PipelineError) -> futures::future::BoxFuture<'static, PipelineResponse>
            + Send
            + Sync
            + 'static,
    {
        Self { order: order::FALLBACK_ON_BREAK, on_break_action: Arc::new(action) }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Merge this (caller) definition over a preset
    pub(crate) fn merge(self, preset: &Self) -> Self {
        Self {
            order: if self.order == order::FALLBACK_ON_BREAK { preset.order } else { self.order },
            on_break_action: self.on_break_action,
        }
    }
}

impl fmt::Debug for FallbackOnBreakDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackOnBreakDefinition")
            .field("order", &self.order)
            .field("on_break_action", &"<action>")
            .finish()
    }
}

/// Runnable general fallback layer
pub(crate) struct FallbackLayer {
    action: FallbackAction,
    events: Arc<dyn PipelineEvents>,
}

impl FallbackLayer {
    pub(crate) fn new(def: &FallbackDefinition, events: Arc<dyn PipelineEvents>) -> Self {
        Self { action: Arc::clone(&def.fallback_action), events }
    }
}

#[async_trait]
impl PolicyLayer for FallbackLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        match next.run(ctx.clone()).await {
            Err(error) if !error.is_cancellation() => {
                events::emit("on_fallback", || self.events.on_fallback(ctx.request(), &error));
                Ok((self.action)(ctx.request(), &error).await)
            }
            other => other,
        }
    }
}

/// Runnable fallback-on-break layer
pub(crate) struct FallbackOnBreakLayer {
    action: FallbackAction,
    events: Arc<dyn PipelineEvents>,
}

impl FallbackOnBreakLayer {
    pub(crate) fn new(def: &FallbackOnBreakDefinition, events: Arc<dyn PipelineEvents>) -> Self {
        Self { action: Arc::clone(&def.on_break_action), events }
    }
}

#[async_trait]
impl PolicyLayer for FallbackOnBreakLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        match next.run(ctx.clone()).await {
            Err(error @ PipelineError::CircuitOpen) => {
                events::emit("on_fallback", || self.events.on_fallback(ctx.request(), &error));
                Ok((self.action)(ctx.request(), &error).await)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::order;

    fn noop_action() -> FallbackDefinition {
        FallbackDefinition::new(|_, _| {
            Box::pin(async { PipelineResponse::new(http::StatusCode::OK) })
        })
    }

    /// Validates that the canonical fallback pair is adjacent, as the
    /// placement invariant requires of defaults.
    #[test]
    fn test_canonical_adjacency() {
        let fallback = noop_action();
        let on_break = FallbackOnBreakDefinition::new(|_, _| {
            Box::pin(async { PipelineResponse::new(http::StatusCode::OK) })
        });
        assert_eq!(on_break.order, fallback.order - 1);
    }

    /// Validates order merge: the canonical default takes the preset's
    /// position, an explicit override wins, and the caller's action is kept.
    #[test]
    fn test_merge_order() {
        let preset = noop_action().order(order::FALLBACK + 10);

        let merged = noop_action().merge(&preset);
        assert_eq!(merged.order, order::FALLBACK + 10);

        let explicit = noop_action().order(42).merge(&preset);
        assert_eq!(explicit.order, 42);
    }
}

//! Bulkhead policy for limiting concurrent calls
//!
//! A fixed-capacity admission counter (`max_parallelization`) plus an
//! optional bounded wait queue (`max_queuing`, default 0 = fail-fast). A
//! call acquires a slot immediately, waits in the queue if capacity allows,
//! or is rejected when both are exhausted. An optional queue-entry timeout
//! bounds the wait independently of any timeout policy.
//!
//! Admission state is shared by every concurrent call to the same pipeline.
//! A caller cancelled while queued releases its queue slot instead of
//! leaving a phantom reservation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::PipelineError;
use crate::events::{self, PipelineEvents};
use crate::pipeline::{ExecutionContext, Next, PolicyLayer, PolicyResult};

/// Configuration for a bulkhead policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadDefinition {
    /// Chain position
    #[serde(default = "defaults::order")]
    pub order: i32,
    /// Maximum number of concurrent calls allowed through
    #[serde(default = "defaults::max_parallelization")]
    pub max_parallelization: u32,
    /// Maximum number of calls waiting for a slot (0 = fail-fast)
    #[serde(default)]
    pub max_queuing: u32,
    /// Upper bound on how long a call may wait in the queue
    #[serde(with = "crate::serde_util::duration_millis_opt", default)]
    pub queue_timeout: Option<Duration>,
}

mod defaults {
    pub(super) fn order() -> i32 {
        crate::policy::order::BULKHEAD
    }

    pub(super) fn max_parallelization() -> u32 {
        64
    }
}

impl Default for BulkheadDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadDefinition {
    /// A bulkhead definition with the documented defaults
    pub fn new() -> Self {
        Self {
            order: defaults::order(),
            max_parallelization: defaults::max_parallelization(),
            max_queuing: 0,
            queue_timeout: None,
        }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Override the parallelization limit
    #[must_use]
    pub fn max_parallelization(mut self, max: u32) -> Self {
        self.max_parallelization = max;
        self
    }

    /// Override the queue limit
    #[must_use]
    pub fn max_queuing(mut self, max: u32) -> Self {
        self.max_queuing = max;
        self
    }

    /// Bound how long a call may wait in the queue
    #[must_use]
    pub fn queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Merge this (caller) definition over a preset, field by field
    pub(crate) fn merge(self, preset: &Self) -> Self {
        Self {
            order: if self.order == defaults::order() { preset.order } else { self.order },
            max_parallelization: if self.max_parallelization == defaults::max_parallelization() {
                preset.max_parallelization
            } else {
                self.max_parallelization
            },
            max_queuing: if self.max_queuing == 0 { preset.max_queuing } else { self.max_queuing },
            queue_timeout: if self.queue_timeout.is_none() {
                preset.queue_timeout
            } else {
                self.queue_timeout
            },
        }
    }
}

/// Decrements the queued-waiter count when dropped, including on
/// cancellation while waiting.
struct QueueSlot<'a>(&'a AtomicU32);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runnable bulkhead layer holding the shared admission state
pub(crate) struct BulkheadLayer {
    max_parallelization: u32,
    max_queuing: u32,
    queue_timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
    queued: AtomicU32,
    events: Arc<dyn PipelineEvents>,
}

impl BulkheadLayer {
    pub(crate) fn new(def: &BulkheadDefinition, events: Arc<dyn PipelineEvents>) -> Self {
        Self {
            max_parallelization: def.max_parallelization,
            max_queuing: def.max_queuing,
            queue_timeout: def.queue_timeout,
            semaphore: Arc::new(Semaphore::new(def.max_parallelization as usize)),
            queued: AtomicU32::new(0),
            events,
        }
    }

    fn rejected(&self) -> PipelineError {
        PipelineError::BulkheadRejected {
            max_parallelization: self.max_parallelization,
            max_queuing: self.max_queuing,
        }
    }

    /// Reserve a queue slot, or fail when the queue is full
    fn enter_queue(&self) -> Result<QueueSlot<'_>, PipelineError> {
        let mut current = self.queued.load(Ordering::Acquire);
        loop {
            if current >= self.max_queuing {
                return Err(self.rejected());
            }
            match self.queued.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(QueueSlot(&self.queued)),
                Err(actual) => current = actual,
            }
        }
    }

    async fn acquire(&self, ctx: &ExecutionContext) -> Result<OwnedSemaphorePermit, PipelineError> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }

        // capacity exhausted: wait in the bounded queue, or fail fast
        let _slot = self.enter_queue()?;
        debug!(queued = self.queued.load(Ordering::Acquire), "bulkhead queueing call");

        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        tokio::select! {
            permit = acquire => permit.map_err(|_| self.rejected()),
            () = ctx.cancel().cancelled() => Err(PipelineError::Cancelled),
            () = queue_wait(self.queue_timeout) => Err(self.rejected()),
        }
    }
}

/// Sleeps for the queue timeout, or forever when none is configured
async fn queue_wait(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl PolicyLayer for BulkheadLayer {
    async fn execute(&self, ctx: ExecutionContext, next: Next) -> PolicyResult {
        let _permit = match self.acquire(&ctx).await {
            Ok(permit) => permit,
            Err(error) => {
                if error.is_rejection() {
                    events::emit("on_bulkhead_rejected", || {
                        self.events.on_bulkhead_rejected(ctx.request(), &error);
                    });
                }
                return Err(error);
            }
        };

        next.run(ctx).await
        // permit drops here, releasing the slot
    }
}

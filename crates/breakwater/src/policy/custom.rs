//! Custom policy: an opaque caller-provided layer
//!
//! A custom policy takes sole control of the call: structural validation
//! forbids combining it with built-in policies, and the chain builder keeps
//! the same rule defensively at execution time. The factory is invoked once
//! per pipeline; the produced layer is shared by every request.

use std::fmt;
use std::sync::Arc;

use crate::pipeline::PolicyLayer;
use crate::policy::CustomPolicyFactory;

/// Configuration for a custom policy
#[derive(Clone)]
pub struct CustomDefinition {
    /// Chain position; immaterial in practice since custom policies run alone
    pub order: i32,
    factory: CustomPolicyFactory,
}

impl CustomDefinition {
    /// A custom policy built by the given factory
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn PolicyLayer> + Send + Sync + 'static,
    {
        Self { order: 1, factory: Arc::new(factory) }
    }

    /// Override the chain position
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Invoke the factory, producing the runnable layer
    pub(crate) fn build(&self) -> Arc<dyn PolicyLayer> {
        (self.factory)()
    }
}

impl fmt::Debug for CustomDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDefinition")
            .field("order", &self.order)
            .field("factory", &"<factory>")
            .finish()
    }
}

//! The transport seam
//!
//! The engine never performs I/O itself: the innermost chain step hands the
//! request to a [`Transport`]. Implementations should observe the provided
//! cancellation token so optimistic timeouts and caller abandonment unwind
//! cooperatively.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::request::{PipelineRequest, PipelineResponse};

#[cfg(feature = "transport-reqwest")]
mod reqwest;

#[cfg(feature = "transport-reqwest")]
pub use self::reqwest::ReqwestTransport;

/// Sends one outbound request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call, observing the cancellation token
    async fn send(
        &self,
        request: &PipelineRequest,
        cancellation: &CancellationToken,
    ) -> Result<PipelineResponse, TransportError>;
}

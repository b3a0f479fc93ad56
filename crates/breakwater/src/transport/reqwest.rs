//! Production transport adapter backed by reqwest
//!
//! Thin by design: the adapter maps between the engine's messages and
//! reqwest's, races the dispatch against the cancellation token, and leaves
//! every resiliency decision to the pipeline. Connection pooling, TLS and
//! redirects stay whatever the injected client is configured for.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::request::{PipelineRequest, PipelineResponse};
use crate::transport::Transport;

/// A [`Transport`] dispatching through a shared `reqwest::Client`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: ::reqwest::Client,
}

impl ReqwestTransport {
    /// Adapt an existing client (pooling and TLS already configured)
    pub fn new(client: ::reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &PipelineRequest,
        cancellation: &CancellationToken,
    ) -> Result<PipelineResponse, TransportError> {
        let url = request.uri().to_string();
        let dispatch = self
            .client
            .request(request.method().clone(), &url)
            .headers(request.headers().clone())
            .send();

        let response = tokio::select! {
            sent = dispatch => {
                sent.map_err(|error| TransportError::with_source("request failed", error))?
            }
            () = cancellation.cancelled() => {
                return Err(TransportError::new("request cancelled"));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = tokio::select! {
            read = response.bytes() => {
                read.map_err(|error| TransportError::with_source("body read failed", error))?
            }
            () = cancellation.cancelled() => {
                return Err(TransportError::new("request cancelled"));
            }
        };

        Ok(PipelineResponse::new(status).with_headers(headers).with_body(body))
    }
}

//! Request and response messages flowing through the pipeline
//!
//! The engine is transport-agnostic: it only needs the request's method, URI
//! and headers (for idempotency gating and diagnostics) and the response's
//! status and headers (for retry and breaker predicates). Both types are
//! built on the `http` crate so any transport adapter can map to and from
//! its own representation without copying semantics.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use crate::error::PipelineError;

/// Whether a method is safe to retry without side-effect duplication
///
/// A fixed, conservative allow-list: GET, HEAD and OPTIONS only.
pub fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// An outbound request about to be sent through a pipeline
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl PipelineRequest {
    /// Create a request with the given method and URI
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, headers: HeaderMap::new() }
    }

    /// Create a GET request (convenience)
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create a POST request (convenience)
    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Attach a header, replacing any previous value for the name
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the request's method is on the idempotent allow-list
    pub fn is_idempotent(&self) -> bool {
        is_idempotent(&self.method)
    }
}

/// A response produced by the transport or substituted by a fallback
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl PipelineResponse {
    /// Create a response with the given status and no headers or body
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Replace the full header map
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a header, replacing any previous value for the name
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The response status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the status is in the 2xx success range
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The server-requested retry delay, if present
    ///
    /// Parses a delta-seconds `Retry-After` header. HTTP-date values are not
    /// interpreted and yield `None`, falling back to the computed backoff.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(http::header::RETRY_AFTER)?;
        let seconds: u64 = value.to_str().ok()?.trim().parse().ok()?;
        Some(Duration::from_secs(seconds))
    }
}

/// A borrowed view of one call's outcome, fed to retry and breaker predicates
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    /// The call produced a response (possibly a non-success status)
    Response(&'a PipelineResponse),
    /// The call failed with a pipeline error
    Error(&'a PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the conservative idempotent-method allow-list: GET, HEAD and
    /// OPTIONS are idempotent; POST, PUT, PATCH and DELETE are not.
    #[test]
    fn test_idempotent_methods() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::HEAD));
        assert!(is_idempotent(&Method::OPTIONS));

        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::PATCH));
        assert!(!is_idempotent(&Method::DELETE));
    }

    /// Validates `Retry-After` parsing: delta-seconds values are honored,
    /// absent or non-numeric values yield `None`.
    #[test]
    fn test_retry_after_parsing() {
        let plain = PipelineResponse::new(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(plain.retry_after(), None);

        let delta = PipelineResponse::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header(http::header::RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(delta.retry_after(), Some(Duration::from_secs(2)));

        let date = PipelineResponse::new(StatusCode::TOO_MANY_REQUESTS).with_header(
            http::header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2025 07:28:00 GMT"),
        );
        assert_eq!(date.retry_after(), None);
    }

    /// Validates request construction helpers and header attachment.
    #[test]
    fn test_request_builders() {
        let request = PipelineRequest::get(Uri::from_static("http://svc.local/health"))
            .with_header(http::header::ACCEPT, HeaderValue::from_static("application/json"));

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.uri().path(), "/health");
        assert!(request.is_idempotent());
        assert_eq!(request.headers().len(), 1);
    }
}

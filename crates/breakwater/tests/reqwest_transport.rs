//! Integration tests for the reqwest transport adapter
//!
//! Runs a real pipeline against a wiremock server: a plain success, a
//! transient 503 recovered by the retry policy, and cancellation of an
//! in-flight dispatch.

use std::sync::Arc;
use std::time::Duration;

use breakwater::{
    PipelineError, PipelineRequest, ReqwestTransport, ResiliencyOptions, ResiliencyPipeline,
    RetryDefinition, TracingEvents, Transport,
};
use http::Uri;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request_for(server: &MockServer, route: &str) -> PipelineRequest {
    let uri: Uri = format!("{}{route}", server.uri()).parse().expect("valid uri");
    PipelineRequest::get(uri)
}

fn retrying_pipeline(transport: Arc<dyn Transport>) -> ResiliencyPipeline {
    let options = ResiliencyOptions::builder()
        .retry(RetryDefinition::new().retry_count(2).delay(Duration::from_millis(20)))
        .build()
        .expect("valid options");
    ResiliencyPipeline::new(options, transport, Some(Arc::new(TracingEvents)))
        .expect("pipeline builds")
}

/// Validates a plain dispatch through the adapter: status, headers and body
/// are mapped back into the pipeline's response type.
#[tokio::test(flavor = "multi_thread")]
async fn test_dispatch_maps_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let transport = Arc::new(ReqwestTransport::default());
    let pipeline = ResiliencyPipeline::new(ResiliencyOptions::empty(), transport, None)
        .expect("pipeline builds");

    let response = pipeline
        .execute(request_for(&server, "/ping"), CancellationToken::new())
        .await
        .expect("response");

    assert!(response.is_success());
    assert_eq!(response.body().as_ref(), b"pong");
}

/// Validates retry recovery over the wire: one 503 followed by a 200 yields
/// a success after a single retry.
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_recovers_transient_503() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let pipeline = retrying_pipeline(Arc::new(ReqwestTransport::default()));

    let response = pipeline
        .execute(request_for(&server, "/flaky"), CancellationToken::new())
        .await
        .expect("recovered response");
    assert!(response.is_success());
}

/// Validates cancellation of an in-flight dispatch: a slow endpoint is
/// abandoned when the caller's token fires, classified as cancelled, and
/// never retried.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_abandons_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let pipeline = retrying_pipeline(Arc::new(ReqwestTransport::default()));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let result = pipeline.execute(request_for(&server, "/slow"), token).await;
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}

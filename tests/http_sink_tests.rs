// Tests for the HTTP upload sink's error classification
//
// The scheduler's retry policy depends entirely on the sink sorting
// failures into transient vs permanent, so the status mapping is pinned
// down here against a real HTTP server.

use capture_uplink::{DeliveryError, HttpUploadSink, UploadSink};
use wiremock::matchers::{body_bytes, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_acknowledged_upload_succeeds() {
    let server = MockServer::start().await;
    let payload = vec![7u8; 256];

    Mock::given(method("PUT"))
        .and(path("/sessions/s1/chunks/0"))
        .and(body_bytes(payload.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpUploadSink::new(server.uri()).unwrap();
    sink.put_chunk("s1", 0, &payload).await.unwrap();
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/sessions/s1/chunks/3"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sink = HttpUploadSink::new(server.uri()).unwrap();
    let err = sink.put_chunk("s1", 3, b"data").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transient(_)), "5xx must be retried");
}

#[tokio::test]
async fn test_throttling_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/sessions/s1/chunks/0"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let sink = HttpUploadSink::new(server.uri()).unwrap();
    let err = sink.put_chunk("s1", 0, b"data").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transient(_)));
}

#[tokio::test]
async fn test_client_rejection_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/sessions/s1/chunks/0"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let sink = HttpUploadSink::new(server.uri()).unwrap();
    let err = sink.put_chunk("s1", 0, b"data").await.unwrap_err();
    assert!(
        matches!(err, DeliveryError::Permanent(_)),
        "4xx must escalate straight to the ledger"
    );
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    // Nothing listens here
    let sink = HttpUploadSink::new("http://127.0.0.1:9").unwrap();
    let err = sink.put_chunk("s1", 0, b"data").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transient(_)));
}

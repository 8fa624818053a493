//! HTTP/2 connection handling over an in-memory pipe.

mod common;

use std::time::Duration;

use bytes::Bytes;
use h2::ext::Protocol as ConnectProtocol;
use h2::Reason;
use http::{Method, StatusCode};

use common::{config, context, h2_harness, h2_request, read_body, wait_for_connect_protocol};
use test_server::config::Protocol;

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// A masked client frame with a short payload.
fn client_frame(opcode: u8, payload: &[u8]) -> Bytes {
    assert!(payload.len() < 126);
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&MASK);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
    Bytes::from(frame)
}

fn websocket_connect(path: &str, protocol: &'static str, version: Option<&str>) -> http::Request<()> {
    let mut builder = http::Request::builder()
        .method(Method::CONNECT)
        .uri(format!("https://localhost{}", path))
        .extension(ConnectProtocol::from_static(protocol));
    if let Some(version) = version {
        builder = builder.header("sec-websocket-version", version);
    }
    builder.body(()).expect("request")
}

#[tokio::test]
async fn get_is_routed_with_stream_id() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, _) = client
        .send_request(h2_request(Method::GET, "/echo?via=h2"), true)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_body(response.into_body()).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["path"], "/echo");
    assert_eq!(doc["query"], "via=h2");
    assert_eq!(doc["version"], "HTTP/2.0");
    assert_eq!(doc["stream_id"], 1);
}

#[tokio::test]
async fn post_body_and_trailers_reach_handler() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, mut upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    upload.send_data(Bytes::from_static(b"hello "), false).unwrap();
    upload.send_data(Bytes::from_static(b"world"), false).unwrap();
    let mut trailers = http::HeaderMap::new();
    trailers.insert("x-checksum", "abc".parse().unwrap());
    upload.send_trailers(trailers).unwrap();

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body(response.into_body()).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["body"], "hello world");
    assert_eq!(doc["headers"]["x-checksum"][0], "abc");
}

#[tokio::test]
async fn reset_stream_does_not_affect_siblings() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (_reset_response, mut reset_upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    reset_upload.send_data(Bytes::from_static(b"abandoned"), false).unwrap();
    reset_upload.send_reset(Reason::CANCEL);

    let mut client = client.ready().await.unwrap();
    let (response, _) = client
        .send_request(h2_request(Method::GET, "/echo"), true)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body(response.into_body()).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["stream_id"], 3);
}

#[tokio::test]
async fn reset_mid_body_leaves_concurrent_stream_intact() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (doomed_response, mut doomed_upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    doomed_upload.send_data(Bytes::from_static(b"doomed"), false).unwrap();

    let mut client = client.ready().await.unwrap();
    let (response, mut upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    upload.send_data(Bytes::from_static(b"first "), false).unwrap();

    // Both workers are mid-body when the sibling is cancelled.
    tokio::time::sleep(Duration::from_millis(50)).await;
    doomed_upload.send_reset(Reason::CANCEL);
    upload.send_data(Bytes::from_static(b"second"), true).unwrap();

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_body(response.into_body()).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["stream_id"], 3);
    assert_eq!(doc["body"], "first second");
    assert!(doomed_response.await.is_err());
}

#[tokio::test]
async fn frame_hooks_run_and_body_stays_readable() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, mut upload) = client
        .send_request(h2_request(Method::POST, "/hooked"), false)
        .unwrap();
    upload.send_data(Bytes::from_static(b"hel"), false).unwrap();
    upload.send_data(Bytes::from_static(b"lo"), true).unwrap();

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-headers-hooks").unwrap(), "1");
    let data_hooks: usize = response.headers()["x-data-hooks"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(data_hooks >= 1);

    let body = read_body(response.into_body()).await.unwrap();
    assert_eq!(body, b"len=5;hello");
}

#[tokio::test]
async fn large_response_respects_flow_control() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    // Larger than the default 65535-byte stream window.
    let payload = "x".repeat(200 * 1024);
    let (response, mut upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    upload.send_data(Bytes::from(payload.clone()), true).unwrap();

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = tokio::time::timeout(Duration::from_secs(5), read_body(response.into_body()))
        .await
        .expect("body arrived")
        .unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["body"].as_str().map(str::len), Some(payload.len()));
}

#[tokio::test]
async fn unterminated_response_is_ended_for_the_handler() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, _) = client
        .send_request(h2_request(Method::GET, "/partial"), true)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("connection").is_none());

    let body = tokio::time::timeout(Duration::from_secs(2), read_body(response.into_body()))
        .await
        .expect("stream ended")
        .unwrap();
    assert_eq!(body, b"partial");
}

#[tokio::test]
async fn unknown_path_is_404_on_its_stream() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, _) = client
        .send_request(h2_request(Method::GET, "/missing"), true)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_body(response.into_body()).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["error"]["code"], 404);
}

#[tokio::test]
async fn oversized_body_is_413() {
    let mut config = config(Protocol::H2);
    config.limits.max_body_size = 8;
    let harness = h2_harness(context(&config)).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, mut upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    upload
        .send_data(Bytes::from_static(b"definitely more than eight"), true)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn dropped_connection_stops_every_worker() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    let mut client = harness.client.ready().await.unwrap();

    // Leave a request body open so its worker is blocked on the queue.
    let (_response, _upload) = client
        .send_request(h2_request(Method::POST, "/echo"), false)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(client);
    harness.client_conn.abort();

    let served = tokio::time::timeout(Duration::from_secs(3), harness.server)
        .await
        .expect("connection handler returned");
    assert!(served.is_ok(), "handler task panicked");
}

#[tokio::test]
async fn websocket_echo_over_extended_connect() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    wait_for_connect_protocol(&harness.client).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, mut upstream) = client
        .send_request(websocket_connect("/chat", "websocket", Some("13")), false)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut downstream = response.into_body();

    upstream.send_data(client_frame(0x1, b"hi there"), false).unwrap();

    let mut received = Vec::new();
    while received.len() < 2 + 8 {
        let chunk = downstream.data().await.expect("echo frame").unwrap();
        let _ = downstream.flow_control().release_capacity(chunk.len());
        received.extend_from_slice(&chunk);
    }
    assert_eq!(&received[..10], b"\x81\x08hi there");

    // Close with 1000; the server answers with its own close and ends the stream.
    upstream.send_data(client_frame(0x8, &[0x03, 0xe8]), false).unwrap();
    let rest = tokio::time::timeout(Duration::from_secs(2), read_body(downstream))
        .await
        .expect("stream ended")
        .unwrap();
    let mut rest_all = received[10..].to_vec();
    rest_all.extend_from_slice(&rest);
    assert_eq!(rest_all.first(), Some(&0x88));
}

#[tokio::test]
async fn other_connect_protocols_are_reset() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    wait_for_connect_protocol(&harness.client).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, _upstream) = client
        .send_request(websocket_connect("/session", "webtransport", Some("13")), false)
        .unwrap();
    let err = response.await.expect_err("stream reset");
    assert_eq!(err.reason(), Some(Reason::PROTOCOL_ERROR));
}

#[tokio::test]
async fn missing_websocket_version_is_400() {
    let harness = h2_harness(context(&config(Protocol::H2))).await;
    wait_for_connect_protocol(&harness.client).await;
    let mut client = harness.client.ready().await.unwrap();

    let (response, _upstream) = client
        .send_request(websocket_connect("/chat", "websocket", None), false)
        .unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers().get("sec-websocket-version").unwrap(), "13");
}

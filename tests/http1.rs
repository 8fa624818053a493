//! HTTP/1.1 over plain TCP.

mod common;

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use common::{config, read_response, roundtrip, start, write_all};
use test_server::config::{Protocol, RewriteConfig};

#[tokio::test]
async fn echo_reports_every_header() {
    let server = start(&config(Protocol::Http)).await;

    let mut raw = String::from("GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for i in 0..398 {
        raw.push_str(&format!("X-Filler-{i}: {i}\r\n"));
    }
    raw.push_str("\r\n");

    let response = roundtrip(server.local_addr(), raw.as_bytes())
        .await
        .expect("response");
    assert_eq!(response.status, 200);
    let doc = response.json();
    assert_eq!(doc["header_count"], 400);
    assert_eq!(doc["headers"]["x-filler-397"][0], "397");

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn rewrite_changes_path_and_keeps_query() {
    let mut config = config(Protocol::Http);
    config.rewrites = vec![
        RewriteConfig {
            methods: vec!["GET".into()],
            input: "/old".into(),
            output: "/new".into(),
        },
        RewriteConfig {
            methods: vec!["*".into()],
            input: "/old".into(),
            output: "/elsewhere".into(),
        },
    ];
    let server = start(&config).await;

    let response = roundtrip(
        server.local_addr(),
        b"GET /old?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .expect("response");
    assert_eq!(response.status, 200);
    let doc = response.json();
    assert_eq!(doc["path"], "/new");
    assert_eq!(doc["query"], "x=1");

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unread_body_is_drained_before_next_request() {
    let server = start(&config(Protocol::Http)).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    write_all(
        &mut stream,
        b"POST /ignore-body HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nhello world",
    )
    .await;
    let first = read_response(&mut stream).await.expect("first response");
    assert_eq!(first.status, 200);
    assert_eq!(first.body, b"ignored");

    write_all(
        &mut stream,
        b"GET /echo/again HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    let second = read_response(&mut stream).await.expect("second response");
    assert_eq!(second.status, 200);
    assert_eq!(second.json()["path"], "/echo/again");

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn echoes_request_body() {
    let server = start(&config(Protocol::Http)).await;

    let response = roundtrip(
        server.local_addr(),
        b"POST /echo HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )
    .await
    .expect("response");
    assert_eq!(response.status, 200);
    let doc = response.json();
    assert_eq!(doc["body"], "hello world");
    assert_eq!(doc["body_length"], 11);

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unknown_path_is_json_404() {
    let server = start(&config(Protocol::Http)).await;

    let response = roundtrip(
        server.local_addr(),
        b"GET /nowhere HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .expect("response");
    assert_eq!(response.status, 404);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.json()["error"]["code"], 404);

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn handler_errors_map_to_status() {
    let server = start(&config(Protocol::Http)).await;
    let addr = server.local_addr();

    let untyped = roundtrip(addr, b"GET /fail/untyped HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .expect("response");
    assert_eq!(untyped.status, 500);

    let typed = roundtrip(addr, b"GET /fail/unavailable HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .expect("response");
    assert_eq!(typed.status, 503);
    let message = typed.json()["error"]["message"].as_str().unwrap().to_string();
    assert!(message.contains("backend pool exhausted"), "{message}");

    let client = roundtrip(addr, b"GET /fail/forbidden HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .expect("response");
    assert_eq!(client.status, 403);
    assert_eq!(client.json()["error"]["message"], "members only");

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn configured_latency_delays_response() {
    let mut config = config(Protocol::Http);
    config.latency_ms = Some(200);
    let server = start(&config).await;

    let started = Instant::now();
    let response = roundtrip(
        server.local_addr(),
        b"GET /echo HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await
    .expect("response");
    assert_eq!(response.status, 200);
    assert!(started.elapsed() >= Duration::from_millis(200));

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn overlong_request_line_closes_without_response() {
    let server = start(&config(Protocol::Http)).await;

    let raw = format!(
        "GET /{} HTTP/1.1\r\nConnection: close\r\n\r\n",
        "a".repeat(70_000)
    );
    assert!(roundtrip(server.local_addr(), raw.as_bytes()).await.is_none());

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn head_response_has_no_body() {
    let server = start(&config(Protocol::Http)).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    write_all(
        &mut stream,
        b"HEAD /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status, headers) = common::read_head(&mut stream).await.expect("head");
    assert_eq!(status, 200);
    let length: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .expect("content-length");
    assert!(length > 0);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn plain_connect_keeps_serving_http() {
    let server = start(&config(Protocol::Http)).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    write_all(
        &mut stream,
        b"CONNECT localhost:443 HTTP/1.1\r\nHost: localhost:443\r\n\r\n",
    )
    .await;
    let (status, _) = common::read_head(&mut stream).await.expect("CONNECT answer");
    assert_eq!(status, 200);

    write_all(&mut stream, b"GET /echo HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let response = read_response(&mut stream).await.expect("response");
    assert_eq!(response.status, 200);

    server.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn works_with_a_real_client() {
    let server = start(&config(Protocol::Http)).await;

    let doc: serde_json::Value = reqwest::get(format!(
        "http://{}/echo/client?lang=rust",
        server.local_addr()
    ))
    .await
    .expect("request")
    .json()
    .await
    .expect("JSON");
    assert_eq!(doc["method"], "GET");
    assert_eq!(doc["path"], "/echo/client");
    assert_eq!(doc["query"], "lang=rust");

    server.stop(Duration::from_secs(1)).await;
}

//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use test_server::config::{Protocol, ServerConfig, TlsConfig};
use test_server::h2::Http2ConnectionHandler;
use test_server::handlers::{EchoDispatcher, EchoHandler};
use test_server::http::{HandlerError, HttpError, Request, Response, ServerContext};
use test_server::lifecycle::{start_with_context, RunningServer};
use test_server::net::connection::ConnectionId;
use test_server::h2::StreamFrame;
use test_server::routing::{FrameHandler, Handler, RouteTable};

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

/// Ephemeral-port config for `protocol`, with the test certificate when needed.
pub fn config(protocol: Protocol) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.port = 0;
    config.listener.protocol = protocol;
    if protocol.is_tls() {
        config.listener.tls = Some(test_tls());
    }
    config.http2.stream_poll_timeout_ms = 100;
    config
}

pub fn test_tls() -> TlsConfig {
    TlsConfig {
        cert_path: fixture("cert.pem"),
        key_path: fixture("key.pem"),
    }
}

/// Routes used across tests; everything unmatched is a 404.
pub fn routes() -> RouteTable {
    RouteTable::new()
        .route(["*"], "/echo*", Arc::new(EchoHandler::new()))
        .route(["*"], "/new", Arc::new(EchoHandler::new()))
        .route(["*"], "/ignore-body", Arc::new(StaticHandler("ignored")))
        .route(["GET"], "/fail/untyped", Arc::new(FailingHandler::Untyped))
        .route(["GET"], "/fail/unavailable", Arc::new(FailingHandler::ServerError))
        .route(["GET"], "/fail/forbidden", Arc::new(FailingHandler::ClientError))
        .route(["GET"], "/partial", Arc::new(UnterminatedHandler))
        .route(["POST"], "/hooked", Arc::new(HookedHandler))
}

pub fn context(config: &ServerConfig) -> ServerContext {
    ServerContext::from_config(config, Arc::new(routes()), Arc::new(EchoDispatcher))
        .expect("test context")
}

pub async fn start(config: &ServerConfig) -> RunningServer {
    start_with_context(config, context(config))
        .await
        .expect("server starts")
}

pub async fn start_with(config: &ServerConfig, ctx: ServerContext) -> RunningServer {
    start_with_context(config, ctx).await.expect("server starts")
}

/// Answers with a fixed body and never reads the request body.
pub struct StaticHandler(pub &'static str);

#[async_trait]
impl Handler for StaticHandler {
    async fn handle(
        &self,
        _request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        response.write(self.0);
        Ok(())
    }
}

pub enum FailingHandler {
    Untyped,
    ServerError,
    ClientError,
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(
        &self,
        _request: &mut Request<'_>,
        _response: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        Err(match self {
            FailingHandler::Untyped => HandlerError::other("disk on fire"),
            FailingHandler::ServerError => HttpError::new(StatusCode::SERVICE_UNAVAILABLE)
                .caused_by(std::io::Error::other("backend pool exhausted"))
                .into(),
            FailingHandler::ClientError => {
                HttpError::with_message(StatusCode::FORBIDDEN, "members only").into()
            }
        })
    }
}

/// Streams a body and returns without ending the response.
pub struct UnterminatedHandler;

#[async_trait]
impl Handler for UnterminatedHandler {
    async fn handle(
        &self,
        _request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        response.write_head().await?;
        response.send(Bytes::from_static(b"partial"), false).await?;
        Ok(())
    }
}

/// Counts its frame hooks into response headers, then echoes the body.
pub struct HookedHandler;

#[async_trait]
impl Handler for HookedHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        let body = request.body().to_bytes(1024).await?;
        response.write(format!("len={};", body.len()));
        response.write(body);
        Ok(())
    }

    fn frame_handler(&self, _request: &Request<'_>) -> Option<Box<dyn FrameHandler>> {
        Some(Box::new(FrameCounter::default()))
    }
}

#[derive(Default)]
struct FrameCounter {
    headers: usize,
    data: usize,
}

#[async_trait]
impl FrameHandler for FrameCounter {
    async fn handle_headers(
        &mut self,
        _frame: &StreamFrame,
        _request: &mut Request<'static>,
        response: &mut Response<'static>,
    ) -> Result<(), HandlerError> {
        self.headers += 1;
        response
            .headers_mut()
            .insert("x-headers-hooks", self.headers.into());
        Ok(())
    }

    async fn handle_data(
        &mut self,
        frame: &StreamFrame,
        _request: &mut Request<'static>,
        response: &mut Response<'static>,
    ) -> Result<(), HandlerError> {
        if matches!(frame, StreamFrame::Data { .. }) {
            self.data += 1;
        }
        response.headers_mut().insert("x-data-hooks", self.data.into());
        Ok(())
    }
}

/// A parsed HTTP/1 response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

/// Read one response head byte by byte so nothing past it is consumed.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<(u16, Vec<(String, String)>)> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    let text = String::from_utf8_lossy(&head).into_owned();
    let mut lines = text.split("\r\n");
    let status = lines.next()?.split(' ').nth(1)?.parse().ok()?;
    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    Some((status, headers))
}

/// Read one Content-Length delimited response (or read to EOF without one).
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Option<RawResponse> {
    let (status, headers) = read_head(stream).await?;
    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()))
        .and_then(|(_, v)| v.parse::<usize>().ok());
    let mut body = Vec::new();
    match length {
        Some(n) => {
            body.resize(n, 0);
            stream.read_exact(&mut body).await.ok()?;
        }
        None => {
            stream.read_to_end(&mut body).await.ok()?;
        }
    }
    Some(RawResponse {
        status,
        headers,
        body,
    })
}

/// Send raw bytes on a fresh connection and read one response.
pub async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> Option<RawResponse> {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(raw).await.expect("write request");
    read_response(&mut stream).await
}

pub async fn write_all<S: AsyncWrite + Unpin>(stream: &mut S, raw: &[u8]) {
    stream.write_all(raw).await.expect("write");
    stream.flush().await.expect("flush");
}

/// TLS client trusting the test CA, offering `alpn`.
pub fn tls_connector(alpn: &[&[u8]]) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    let pem = std::fs::read(fixture("ca.pem")).expect("read CA");
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.expect("CA cert")).expect("add CA");
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsConnector::from(Arc::new(config))
}

pub fn localhost() -> rustls::pki_types::ServerName<'static> {
    rustls::pki_types::ServerName::try_from("localhost").expect("server name")
}

/// An HTTP/2 connection handler serving one end of an in-memory pipe.
pub struct H2Harness {
    pub client: h2::client::SendRequest<Bytes>,
    pub client_conn: JoinHandle<()>,
    pub server: JoinHandle<Result<(), h2::Error>>,
}

pub async fn h2_harness(ctx: ServerContext) -> H2Harness {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let handler = Http2ConnectionHandler::new(Arc::new(ctx), ConnectionId::new());
    let server = tokio::spawn(handler.serve(server_io));

    let (client, connection) = h2::client::handshake(client_io)
        .await
        .expect("h2 handshake");
    let client_conn = tokio::spawn(async move {
        let _ = connection.await;
    });

    H2Harness {
        client,
        client_conn,
        server,
    }
}

/// Wait until the server's SETTINGS (with extended CONNECT) have arrived.
pub async fn wait_for_connect_protocol(client: &h2::client::SendRequest<Bytes>) {
    for _ in 0..100 {
        if client.is_extended_connect_protocol_enabled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never enabled extended CONNECT");
}

/// Collect a response body, releasing flow-control capacity as it goes.
pub async fn read_body(mut body: h2::RecvStream) -> Result<Vec<u8>, h2::Error> {
    let mut out = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        let _ = body.flow_control().release_capacity(chunk.len());
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// h2 client request for `path` on the test authority.
pub fn h2_request(method: http::Method, path: &str) -> http::Request<()> {
    http::Request::builder()
        .method(method)
        .uri(format!("https://localhost{}", path))
        .body(())
        .expect("request")
}

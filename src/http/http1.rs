//! HTTP/1.1 connection handling.
//!
//! # Responsibilities
//! - Read request heads line by line with hard size caps
//! - Parse heads with `httparse`, allowing many header fields
//! - Run rewrite → route → latency → handler → finish for each request
//! - Keep connections alive, draining unread bodies between requests
//! - Switch a plaintext socket to TLS after `CONNECT` when configured
//!
//! # Design Decisions
//! - A request line that is too long or never arrives closes the socket silently
//! - Every other failure still produces a well-formed status line
//! - The stream is re-wrapped at most once per connection

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config::LimitsConfig;
use crate::http::body::{Framing, Http1Body};
use crate::http::response::ResponseSink;
use crate::http::server::{respond_with_error, ServerContext};
use crate::http::{Body, Request, Response};
use crate::net::connection::ConnectionId;

/// Any byte stream a connection can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Type-erased connection stream (plain TCP or TLS).
pub type BoxedIo = Box<dyn Io>;

/// Blank lines tolerated before a request line.
const MAX_LEADING_EMPTY_LINES: usize = 8;

/// Per-connection request processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Http1State {
    ReadingRequestLine,
    Parsed,
    Dispatched,
    Responded,
    KeepAlive,
    Closed,
}

/// What ended one pass over a stream.
enum Outcome {
    Closed,
    /// CONNECT in encrypt-after-connect mode; the raw stream comes back for TLS.
    Encrypt(BoxedIo),
}

/// A parsed request head.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Body framing per RFC 9112 §6.
    pub(crate) fn framing(&self) -> Result<Framing, HeadError> {
        let chunked = self
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(Framing::Chunked);
        }
        match self.headers.get(CONTENT_LENGTH) {
            None => Ok(Framing::Length(0)),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Framing::Length)
                .ok_or(HeadError::Reject(StatusCode::BAD_REQUEST, "invalid content-length")),
        }
    }
}

/// Why no request could be read.
#[derive(Debug, thiserror::Error)]
pub(crate) enum HeadError {
    /// EOF, or a request line over the cap: close without answering.
    #[error("connection closed before a request line")]
    Closed,
    #[error("{1}")]
    Reject(StatusCode, &'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum Line {
    Complete,
    Eof,
    TooLong,
}

/// Append one line (including its terminator) to `out`, refusing lines over `cap`.
async fn read_line_capped<R>(reader: &mut R, out: &mut Vec<u8>, cap: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let start = out.len();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(Line::Eof);
        }
        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        // Allow for the CRLF terminator on top of the content cap.
        if out.len() - start + used > cap + 2 {
            return Ok(Line::TooLong);
        }
        out.extend_from_slice(&available[..used]);
        reader.consume(used);
        if done {
            return Ok(Line::Complete);
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// Read the request line and header block.
pub(crate) async fn read_head<R>(reader: &mut R, limits: &LimitsConfig) -> Result<RequestHead, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);

    let mut blank = 0;
    loop {
        buf.clear();
        match read_line_capped(reader, &mut buf, limits.max_request_line).await? {
            Line::Complete if is_blank(&buf) && blank < MAX_LEADING_EMPTY_LINES => blank += 1,
            Line::Complete => break,
            Line::Eof | Line::TooLong => return Err(HeadError::Closed),
        }
    }

    let mut fields = 0usize;
    loop {
        let line_start = buf.len();
        match read_line_capped(reader, &mut buf, limits.max_request_line).await? {
            Line::Complete if is_blank(&buf[line_start..]) => break,
            Line::Complete => {
                fields += 1;
                if fields > limits.max_headers {
                    return Err(HeadError::Reject(
                        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                        "too many header fields",
                    ));
                }
            }
            Line::TooLong => {
                return Err(HeadError::Reject(
                    StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    "header field too large",
                ))
            }
            Line::Eof => return Err(HeadError::Closed),
        }
    }

    parse_head(&buf, limits.max_headers)
}

/// Parse a complete head (request line, fields, blank line).
pub(crate) fn parse_head(buf: &[u8], max_headers: usize) -> Result<RequestHead, HeadError> {
    let mut storage = vec![httparse::EMPTY_HEADER; max_headers];
    let mut parsed = httparse::Request::new(&mut storage);
    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HeadError::Reject(StatusCode::BAD_REQUEST, "incomplete request head"))
        }
        Err(httparse::Error::TooManyHeaders) => {
            return Err(HeadError::Reject(
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                "too many header fields",
            ))
        }
        Err(_) => return Err(HeadError::Reject(StatusCode::BAD_REQUEST, "malformed request head")),
    }

    let method = parsed
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(HeadError::Reject(StatusCode::BAD_REQUEST, "invalid method"))?;
    let target = parsed
        .path
        .filter(|p| !p.is_empty())
        .ok_or(HeadError::Reject(StatusCode::BAD_REQUEST, "missing request target"))?
        .to_string();
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HeadError::Reject(StatusCode::BAD_REQUEST, "invalid header name"))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HeadError::Reject(StatusCode::BAD_REQUEST, "invalid header value"))?;
        headers.append(name, value);
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Writes a response onto the connection's write half.
pub struct Http1Sink<'w, W> {
    writer: &'w mut W,
}

impl<'w, W> Http1Sink<'w, W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: &'w mut W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> ResponseSink for Http1Sink<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_head(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        end_stream: bool,
    ) -> std::io::Result<()> {
        let mut head = BytesMut::with_capacity(256);
        head.put_slice(b"HTTP/1.1 ");
        head.put_slice(status.as_str().as_bytes());
        head.put_u8(b' ');
        head.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
        head.put_slice(b"\r\n");
        for (name, value) in headers {
            head.put_slice(name.as_str().as_bytes());
            head.put_slice(b": ");
            head.put_slice(value.as_bytes());
            head.put_slice(b"\r\n");
        }
        head.put_slice(b"\r\n");
        self.writer.write_all(&head).await?;
        if end_stream {
            self.writer.flush().await?;
        }
        Ok(())
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> std::io::Result<()> {
        self.writer.write_all(&data).await?;
        if end_stream {
            self.writer.flush().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }
}

/// Serves HTTP/1.x requests on one connection.
pub struct Http1ConnectionHandler {
    ctx: Arc<ServerContext>,
    connection_id: ConnectionId,
    scheme: &'static str,
    state: Http1State,
}

impl Http1ConnectionHandler {
    pub fn new(ctx: Arc<ServerContext>, connection_id: ConnectionId, scheme: &'static str) -> Self {
        Self {
            ctx,
            connection_id,
            scheme,
            state: Http1State::ReadingRequestLine,
        }
    }

    /// Serve requests until the peer or a response closes the connection.
    pub async fn serve(mut self, io: BoxedIo) -> std::io::Result<()> {
        let mut io = io;
        let mut encrypted = false;
        loop {
            match self.serve_stream(io, !encrypted).await? {
                Outcome::Closed => {
                    self.transition(Http1State::Closed);
                    return Ok(());
                }
                Outcome::Encrypt(raw) => {
                    let Some(acceptor) = self.ctx.encrypt_after_connect.clone() else {
                        return Ok(());
                    };
                    tracing::debug!(connection_id = %self.connection_id, "Starting TLS after CONNECT");
                    let tls = acceptor.accept(raw).await?;
                    io = Box::new(tls);
                    self.scheme = "https";
                    encrypted = true;
                }
            }
        }
    }

    fn transition(&mut self, next: Http1State) {
        tracing::trace!(
            connection_id = %self.connection_id,
            from = ?self.state,
            to = ?next,
            "HTTP/1 connection state"
        );
        self.state = next;
    }

    async fn serve_stream(&mut self, io: BoxedIo, may_encrypt: bool) -> std::io::Result<Outcome> {
        let ctx = Arc::clone(&self.ctx);
        let (read_half, mut writer) = tokio::io::split(io);
        let mut reader = BufReader::new(read_half);

        loop {
            self.transition(Http1State::ReadingRequestLine);
            let head = match read_head(&mut reader, &ctx.limits).await {
                Ok(head) => head,
                Err(HeadError::Closed) => return Ok(Outcome::Closed),
                Err(HeadError::Io(err)) => return Err(err),
                Err(HeadError::Reject(status, message)) => {
                    tracing::debug!(
                        connection_id = %self.connection_id,
                        status = status.as_u16(),
                        reason = message,
                        "Rejecting request head"
                    );
                    reject(&mut writer, status, message).await?;
                    return Ok(Outcome::Closed);
                }
            };
            self.transition(Http1State::Parsed);

            let framing = match head.framing() {
                Ok(framing) => framing,
                Err(_) => {
                    reject(&mut writer, StatusCode::BAD_REQUEST, "invalid content-length").await?;
                    return Ok(Outcome::Closed);
                }
            };
            let mut request = match Request::new(
                head.method,
                &head.target,
                head.version,
                head.headers,
                self.scheme,
                self.connection_id,
            ) {
                Ok(request) => request,
                Err(err) => {
                    tracing::debug!(connection_id = %self.connection_id, error = %err, "Bad request target");
                    reject(&mut writer, StatusCode::BAD_REQUEST, "invalid request target").await?;
                    return Ok(Outcome::Closed);
                }
            };
            ctx.rewriter.rewrite(&mut request);

            if *request.method() == Method::CONNECT {
                drop(request);
                Http1Sink::new(&mut writer)
                    .send_head(StatusCode::OK, &HeaderMap::new(), true)
                    .await?;
                tracing::debug!(connection_id = %self.connection_id, "CONNECT answered");
                if may_encrypt && ctx.encrypt_after_connect.is_some() {
                    if !reader.buffer().is_empty() {
                        tracing::warn!(
                            connection_id = %self.connection_id,
                            buffered = reader.buffer().len(),
                            "Client sent data before TLS after CONNECT; closing"
                        );
                        return Ok(Outcome::Closed);
                    }
                    let raw = reader.into_inner().unsplit(writer);
                    return Ok(Outcome::Encrypt(raw));
                }
                continue;
            }

            let wants_close = request.wants_close();
            let is_head = *request.method() == Method::HEAD;
            let version = request.version();
            request.set_body(Body::streaming(Http1Body::new(&mut reader, framing)));

            let mut response = Response::new(Http1Sink::new(&mut writer));
            response.set_suppress_body(is_head);
            response.set_close_connection(wants_close);
            if version == Version::HTTP_10 && !wants_close {
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            }

            self.transition(Http1State::Dispatched);
            match ctx.router.get_handler(&request) {
                None => {
                    let delay = ctx.latency.delay(&request);
                    tokio::time::sleep(delay).await;
                    response.set_error(
                        StatusCode::NOT_FOUND,
                        &format!("no handler for {} {}", request.method(), request.path()),
                    );
                }
                Some(handler) => {
                    let delay = ctx.latency.delay(&request);
                    tokio::time::sleep(delay).await;
                    if let Err(err) = handler.handle(&mut request, &mut response).await {
                        if !respond_with_error(&mut response, &err) {
                            response.set_close_connection(true);
                        }
                    }
                }
            }

            let status = response.status();
            let mut close = response.close_connection();
            if let Err(err) = response.finish().await {
                tracing::debug!(connection_id = %self.connection_id, error = %err, "Response write failed");
                return Err(err);
            }
            close |= response.close_connection();
            drop(response);
            self.transition(Http1State::Responded);

            tracing::debug!(
                connection_id = %self.connection_id,
                method = %request.method(),
                path = request.path(),
                status = status.as_u16(),
                "Request handled"
            );

            if !close {
                if let Err(err) = request.body().drain().await {
                    tracing::debug!(connection_id = %self.connection_id, error = %err, "Could not drain request body");
                    close = true;
                }
            }
            drop(request);

            if close {
                writer.shutdown().await.ok();
                return Ok(Outcome::Closed);
            }
            self.transition(Http1State::KeepAlive);
        }
    }
}

/// Answer a head that never reached a handler, then close.
async fn reject<W>(writer: &mut W, status: StatusCode, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut response = Response::new(Http1Sink::new(writer));
    response.set_close_connection(true);
    response.set_error(status, message);
    response.finish().await
}

//! Response building and writing.
//!
//! # Responsibilities
//! - Collect status, headers and body from handlers
//! - Write through a protocol-specific sink (HTTP/1.1 socket or HTTP/2 stream)
//! - Support both buffer-then-flush and streaming use
//! - Guarantee the response is terminated exactly once
//!
//! # Design Decisions
//! - The head is written at most once; later header edits are ignored by the wire
//! - `finish()` is always called by the server, so handlers may forget it
//! - Error bodies are small JSON documents

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode};

/// Protocol-specific destination of a response.
#[async_trait]
pub trait ResponseSink: Send {
    /// Write the status line / HEADERS frame.
    async fn send_head(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        end_stream: bool,
    ) -> std::io::Result<()>;

    /// Write body bytes.
    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> std::io::Result<()>;

    /// Make sure the peer has observed the end of the response.
    async fn finish(&mut self) -> std::io::Result<()>;
}

/// A response under construction.
pub struct Response<'a> {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    sink: Box<dyn ResponseSink + 'a>,
    head_sent: bool,
    ended: bool,
    finished: bool,
    suppress_body: bool,
    close_connection: bool,
}

impl<'a> Response<'a> {
    pub fn new(sink: impl ResponseSink + 'a) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            sink: Box::new(sink),
            head_sent: false,
            ended: false,
            finished: false,
            suppress_body: false,
            close_connection: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Bytes buffered but not yet written.
    pub fn buffered_body(&self) -> &[u8] {
        &self.body
    }

    /// Do not put body bytes on the wire (responses to HEAD).
    pub fn set_suppress_body(&mut self, suppress: bool) {
        self.suppress_body = suppress;
    }

    /// Ask for the connection to close once this response is done.
    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    pub fn is_head_sent(&self) -> bool {
        self.head_sent
    }

    /// True once the response has been terminated on the wire.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Buffer body bytes until the response is flushed.
    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        self.body.extend_from_slice(data.as_ref());
    }

    /// Replace the response with a JSON error document.
    pub fn set_error(&mut self, status: StatusCode, message: &str) {
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });
        self.status = status;
        self.headers.remove(CONTENT_LENGTH);
        self.headers.remove(TRANSFER_ENCODING);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body.clear();
        self.body.extend_from_slice(body.to_string().as_bytes());
    }

    /// Write the status and headers now; the body will be streamed.
    pub async fn write_head(&mut self) -> std::io::Result<()> {
        if self.head_sent {
            return Ok(());
        }
        if !self.headers.contains_key(CONTENT_LENGTH) && !self.headers.contains_key(TRANSFER_ENCODING)
        {
            // Only connection close can delimit the body.
            self.close_connection = true;
            self.headers
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        self.head_sent = true;
        self.sink.send_head(self.status, &self.headers, false).await
    }

    /// Stream body bytes, writing the head first if needed.
    pub async fn send(&mut self, data: impl Into<Bytes>, end_stream: bool) -> std::io::Result<()> {
        if self.ended {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "response already ended",
            ));
        }
        self.write_head().await?;
        let mut data: Bytes = data.into();
        if !self.body.is_empty() {
            let mut pending = self.body.split();
            pending.extend_from_slice(&data);
            data = pending.freeze();
        }
        if self.suppress_body {
            data = Bytes::new();
        }
        if data.is_empty() && !end_stream {
            return Ok(());
        }
        self.sink.send_data(data, end_stream).await?;
        self.ended = end_stream;
        Ok(())
    }

    /// Flush whatever is pending and terminate the response.
    ///
    /// Safe to call more than once; only the first call writes.
    pub async fn finish(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if !self.head_sent {
            if !self.headers.contains_key(CONTENT_LENGTH) {
                self.headers
                    .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
            }
            if self.close_connection {
                self.headers
                    .insert(CONNECTION, HeaderValue::from_static("close"));
            }
            self.head_sent = true;
            let body = self.body.split().freeze();
            if body.is_empty() || self.suppress_body {
                self.sink.send_head(self.status, &self.headers, true).await?;
            } else {
                self.sink.send_head(self.status, &self.headers, false).await?;
                self.sink.send_data(body, true).await?;
            }
            self.ended = true;
        } else if !self.ended && !self.body.is_empty() {
            let body = self.body.split().freeze();
            if !self.suppress_body {
                self.sink.send_data(body, true).await?;
                self.ended = true;
            }
        }

        self.sink.finish().await?;
        self.ended = true;
        Ok(())
    }
}

impl std::fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("buffered", &self.body.len())
            .field("head_sent", &self.head_sent)
            .field("ended", &self.ended)
            .finish()
    }
}

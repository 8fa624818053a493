//! WebSocket over HTTP/2 (RFC 8441).
//!
//! # Responsibilities
//! - Validate an extended CONNECT stream before it becomes a WebSocket
//! - Prepare (but not flush) the 200 response
//! - Define the dispatcher contract that owns the byte pipe afterwards
//!
//! # Design Decisions
//! - A wrong `:protocol` is a protocol error (stream reset), not a handshake failure
//! - Handshake failures carry the HTTP status the caller answers with

use async_trait::async_trait;
use http::header::{HeaderValue, CONNECTION, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{Method, StatusCode};
use tokio::io::DuplexStream;

use crate::http::{Request, Response};

/// The only WebSocket version spoken.
pub const WEBSOCKET_VERSION: &str = "13";

/// Validation failure that maps to an HTTP error response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("websocket handshake failed ({status}): {message}")]
pub struct HandshakeError {
    status: StatusCode,
    message: String,
}

impl HandshakeError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a stream could not be bootstrapped.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Extended CONNECT misused; the stream is reset.
    #[error("extended CONNECT protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Owns a bootstrapped WebSocket for the life of the stream.
#[async_trait]
pub trait WebSocketDispatcher: Send + Sync {
    /// Pick one of the subprotocols the client offered.
    fn select_protocol(&self, _offered: &[&str]) -> Option<String> {
        None
    }

    /// Run the WebSocket over `io` until either side closes.
    ///
    /// Returning (and dropping `io`) ends the HTTP/2 stream.
    async fn dispatch(&self, path: String, io: DuplexStream);
}

/// Validates extended CONNECT requests.
pub struct WebSocketHandshaker<'d> {
    dispatcher: &'d dyn WebSocketDispatcher,
}

impl<'d> WebSocketHandshaker<'d> {
    pub fn new(dispatcher: &'d dyn WebSocketDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Check the request and set up the success response.
    ///
    /// Nothing is written to the wire; the caller flushes the head once.
    pub fn handshake(
        &self,
        request: &Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), BootstrapError> {
        if *request.method() != Method::CONNECT {
            return Err(HandshakeError::new(
                StatusCode::BAD_REQUEST,
                format!("expected CONNECT, got {}", request.method()),
            )
            .into());
        }

        match request.protocol() {
            Some(protocol) if protocol.eq_ignore_ascii_case("websocket") => {}
            Some(other) => {
                return Err(BootstrapError::Protocol(format!(
                    "unsupported :protocol {other:?}"
                )))
            }
            None => return Err(BootstrapError::Protocol("missing :protocol".into())),
        }

        if request.header("authority").map_or(true, str::is_empty) {
            return Err(
                HandshakeError::new(StatusCode::BAD_REQUEST, "missing :authority").into(),
            );
        }

        if request.header(SEC_WEBSOCKET_VERSION.as_str()) != Some(WEBSOCKET_VERSION) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));
            return Err(HandshakeError::new(
                StatusCode::BAD_REQUEST,
                "unsupported sec-websocket-version",
            )
            .into());
        }

        response.set_status(StatusCode::OK);
        let headers = response.headers_mut();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));

        if let Some(offered) = request.header(SEC_WEBSOCKET_PROTOCOL.as_str()) {
            let offered: Vec<&str> = offered
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if let Some(chosen) = self.dispatcher.select_protocol(&offered) {
                let value = HeaderValue::from_str(&chosen).map_err(|_| {
                    HandshakeError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "dispatcher chose an invalid subprotocol",
                    )
                })?;
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
        }

        Ok(())
    }
}

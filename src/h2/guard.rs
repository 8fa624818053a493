//! Serialized access to per-connection HTTP/2 state.
//!
//! # Responsibilities
//! - Own the stream table shared by the frame reader and every stream worker
//! - Hold each stream's response handles (`SendResponse` / `SendStream`)
//! - Track stream lifecycle: opened → headers-received → receiving-data → ended → closed
//! - Guarantee END_STREAM is sent at most once per stream
//!
//! # Design Decisions
//! - `ConnectionGuard::with` is the only way to reach `H2Session`; there is no
//!   accessor that hands out an unguarded reference
//! - The closure is synchronous, so the lock is never held across an `.await`
//! - Body writes wait for send capacity so the peer's window bounds what h2
//!   buffers on our behalf
//! - An error on one stream never poisons another stream's slot

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use h2::server::SendResponse;
use h2::{Reason, SendStream};
use http::header::{HeaderName, CONNECTION, TE, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, StatusCode};

/// Headers that are meaningless (and forbidden) on an HTTP/2 response.
const CONNECTION_SPECIFIC: [&str; 3] = ["keep-alive", "proxy-connection", "http2-settings"];

/// Lifecycle phase of a stream, as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamPhase {
    /// First frame for this id observed.
    Opened,
    /// Request HEADERS decoded and handed to the worker.
    HeadersReceived,
    /// At least one DATA frame received.
    ReceivingData,
    /// Request side finished (END_STREAM, RST_STREAM or connection loss).
    Ended,
    /// Worker exited; resources released.
    Closed,
}

/// Error operating on a stream through the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("stream {0} is not open on this connection")]
    UnknownStream(u32),
    #[error("stream {0} already sent its response headers")]
    HeadersAlreadySent(u32),
    #[error("stream {0} has not sent its response headers")]
    HeadersNotSent(u32),
    #[error("stream {0} already ended")]
    StreamEnded(u32),
    #[error("invalid response head: {0}")]
    InvalidHead(#[from] http::Error),
    #[error("protocol error on stream {stream_id}: {source}")]
    Protocol {
        stream_id: u32,
        #[source]
        source: h2::Error,
    },
}

impl From<SessionError> for std::io::Error {
    fn from(err: SessionError) -> Self {
        let kind = match &err {
            SessionError::Protocol { source, .. }
                if source.is_io() || source.is_reset() || source.is_go_away() =>
            {
                std::io::ErrorKind::BrokenPipe
            }
            SessionError::UnknownStream(_) | SessionError::StreamEnded(_) => {
                std::io::ErrorKind::BrokenPipe
            }
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

struct StreamSlot {
    phase: StreamPhase,
    responder: SendResponse<Bytes>,
    body: Option<SendStream<Bytes>>,
    local_ended: bool,
}

/// Mutable HTTP/2 state of one connection.
#[derive(Default)]
pub struct H2Session {
    streams: HashMap<u32, StreamSlot>,
}

impl H2Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream the reader has just accepted.
    pub fn open_stream(&mut self, stream_id: u32, responder: SendResponse<Bytes>) {
        self.streams.insert(
            stream_id,
            StreamSlot {
                phase: StreamPhase::Opened,
                responder,
                body: None,
                local_ended: false,
            },
        );
    }

    pub fn phase(&self, stream_id: u32) -> Option<StreamPhase> {
        self.streams.get(&stream_id).map(|s| s.phase)
    }

    /// Move a stream forward in its lifecycle. Phases never go backwards.
    pub fn advance(&mut self, stream_id: u32, phase: StreamPhase) {
        if let Some(slot) = self.streams.get_mut(&stream_id) {
            if phase > slot.phase {
                slot.phase = phase;
            }
        }
    }

    /// Send the response HEADERS frame.
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        status: StatusCode,
        headers: &HeaderMap,
        end_stream: bool,
    ) -> Result<(), SessionError> {
        let slot = self
            .streams
            .get_mut(&stream_id)
            .ok_or(SessionError::UnknownStream(stream_id))?;
        if slot.body.is_some() || slot.local_ended {
            return Err(SessionError::HeadersAlreadySent(stream_id));
        }

        let mut response = http::Response::builder().status(status).body(())?;
        *response.headers_mut() = h2_safe_headers(headers);

        let body = slot
            .responder
            .send_response(response, end_stream)
            .map_err(|source| SessionError::Protocol { stream_id, source })?;
        slot.local_ended = end_stream;
        slot.body = Some(body);
        Ok(())
    }

    /// Send a DATA frame.
    pub fn send_data(
        &mut self,
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), SessionError> {
        let slot = self
            .streams
            .get_mut(&stream_id)
            .ok_or(SessionError::UnknownStream(stream_id))?;
        if slot.local_ended {
            return Err(SessionError::StreamEnded(stream_id));
        }
        let body = slot
            .body
            .as_mut()
            .ok_or(SessionError::HeadersNotSent(stream_id))?;
        body.send_data(data, end_stream)
            .map_err(|source| SessionError::Protocol { stream_id, source })?;
        slot.local_ended = end_stream;
        Ok(())
    }

    /// Ask for `len` bytes of send capacity on the stream.
    pub fn reserve_capacity(&mut self, stream_id: u32, len: usize) -> Result<(), SessionError> {
        self.response_body(stream_id)?.reserve_capacity(len);
        Ok(())
    }

    /// Wait until the stream may send at least one byte.
    pub fn poll_capacity(
        &mut self,
        stream_id: u32,
        cx: &mut Context<'_>,
    ) -> Poll<Result<usize, SessionError>> {
        let body = match self.response_body(stream_id) {
            Ok(body) => body,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let available = body.capacity();
        if available > 0 {
            return Poll::Ready(Ok(available));
        }
        loop {
            match body.poll_capacity(cx) {
                Poll::Ready(Some(Ok(0))) => continue,
                Poll::Ready(Some(Ok(granted))) => return Poll::Ready(Ok(granted)),
                Poll::Ready(Some(Err(source))) => {
                    return Poll::Ready(Err(SessionError::Protocol { stream_id, source }))
                }
                Poll::Ready(None) => return Poll::Ready(Err(SessionError::StreamEnded(stream_id))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn response_body(&mut self, stream_id: u32) -> Result<&mut SendStream<Bytes>, SessionError> {
        let slot = self
            .streams
            .get_mut(&stream_id)
            .ok_or(SessionError::UnknownStream(stream_id))?;
        if slot.local_ended {
            return Err(SessionError::StreamEnded(stream_id));
        }
        slot.body
            .as_mut()
            .ok_or(SessionError::HeadersNotSent(stream_id))
    }

    /// Terminate the response side of a stream.
    ///
    /// Sends an empty DATA frame with END_STREAM unless the stream already
    /// ended. Returns `true` if this call sent the frame.
    pub fn end_stream(&mut self, stream_id: u32) -> Result<bool, SessionError> {
        let slot = self
            .streams
            .get_mut(&stream_id)
            .ok_or(SessionError::UnknownStream(stream_id))?;
        if slot.local_ended {
            return Ok(false);
        }
        let body = slot
            .body
            .as_mut()
            .ok_or(SessionError::HeadersNotSent(stream_id))?;
        body.send_data(Bytes::new(), true)
            .map_err(|source| SessionError::Protocol { stream_id, source })?;
        slot.local_ended = true;
        Ok(true)
    }

    pub fn is_locally_ended(&self, stream_id: u32) -> bool {
        self.streams
            .get(&stream_id)
            .map(|s| s.local_ended)
            .unwrap_or(true)
    }

    /// Abort a stream with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: u32, reason: Reason) {
        if let Some(slot) = self.streams.get_mut(&stream_id) {
            match slot.body.as_mut() {
                Some(body) => body.send_reset(reason),
                None => slot.responder.send_reset(reason),
            }
            slot.local_ended = true;
            slot.phase = StreamPhase::Ended.max(slot.phase);
        }
    }

    /// Drop the stream's handles once its worker is done.
    pub fn release(&mut self, stream_id: u32) -> Option<StreamPhase> {
        self.streams.remove(&stream_id).map(|_| StreamPhase::Closed)
    }

    /// Number of streams whose worker has not released them yet.
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }
}

/// Strip connection-specific fields that HTTP/2 forbids.
fn h2_safe_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    out.remove(CONNECTION);
    out.remove(UPGRADE);
    out.remove(TRANSFER_ENCODING);
    if out.get(TE).map(|v| v != "trailers").unwrap_or(false) {
        out.remove(TE);
    }
    for name in CONNECTION_SPECIFIC {
        out.remove(HeaderName::from_static(name));
    }
    out
}

/// Mutex-protected handle to a connection's [`H2Session`].
#[derive(Clone, Default)]
pub struct ConnectionGuard {
    session: Arc<Mutex<H2Session>>,
}

impl ConnectionGuard {
    pub fn new(session: H2Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut H2Session) -> R) -> R {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    /// Send `data` in pieces no larger than the capacity the peer grants.
    ///
    /// The lock is taken once per poll and released while waiting for a
    /// WINDOW_UPDATE, so other streams keep writing.
    pub async fn send_body(
        &self,
        stream_id: u32,
        mut data: Bytes,
        end_stream: bool,
    ) -> Result<(), SessionError> {
        if data.is_empty() {
            return self.with(|s| s.send_data(stream_id, data, end_stream));
        }
        while !data.is_empty() {
            let wanted = data.len();
            self.with(|s| s.reserve_capacity(stream_id, wanted))?;
            let granted =
                std::future::poll_fn(|cx| self.with(|s| s.poll_capacity(stream_id, cx))).await?;
            let piece = data.split_to(granted.min(data.len()));
            let last = data.is_empty() && end_stream;
            self.with(|s| s.send_data(stream_id, piece, last))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live = self.with(|s| s.live_streams());
        f.debug_struct("ConnectionGuard")
            .field("live_streams", &live)
            .finish()
    }
}

//! Per-stream worker.
//!
//! # Responsibilities
//! - Consume one stream's frames in the order the reader observed them
//! - Choose between ordinary routing and the WebSocket bootstrap
//! - Run the request/response cycle and end the stream exactly once
//!
//! # Design Decisions
//! - Queue pops time out so an idle worker still notices connection shutdown
//! - Receive capacity is released only when a DATA frame is consumed, so the
//!   stream window bounds the queue
//! - Every write goes through the connection guard and waits for send capacity
//! - DATA payloads go into a per-stream pipe that the request body reads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use h2::{FlowControl, Reason};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::h2::frame::StreamFrame;
use crate::h2::guard::{ConnectionGuard, StreamPhase};
use crate::h2::pipe::body_pipe;
use crate::h2::websocket::{BootstrapError, WebSocketHandshaker};
use crate::http::request::H2HeaderView;
use crate::http::response::ResponseSink;
use crate::http::server::{respond_with_error, ServerContext};
use crate::http::{Body, HandlerError, Request, Response};
use crate::net::connection::ConnectionId;
use crate::net::errors::log_connection_error;

const PIPE_READ_CHUNK: usize = 16 * 1024;

/// Response sink writing HEADERS/DATA frames through the connection guard.
pub struct H2Sink {
    guard: ConnectionGuard,
    stream_id: u32,
}

impl H2Sink {
    pub fn new(guard: ConnectionGuard, stream_id: u32) -> Self {
        Self { guard, stream_id }
    }
}

#[async_trait]
impl ResponseSink for H2Sink {
    async fn send_head(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        end_stream: bool,
    ) -> std::io::Result<()> {
        let stream_id = self.stream_id;
        self.guard
            .with(|session| session.send_headers(stream_id, status, headers, end_stream))
            .map_err(Into::into)
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> std::io::Result<()> {
        let stream_id = self.stream_id;
        self.guard
            .send_body(stream_id, data, end_stream)
            .await
            .map_err(Into::into)
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        let stream_id = self.stream_id;
        let sent = self.guard.with(|session| session.end_stream(stream_id))?;
        if sent {
            tracing::trace!(stream_id, "Sent trailing END_STREAM on behalf of handler");
        }
        Ok(())
    }
}

/// Owns one HTTP/2 stream from its opening HEADERS until it closes.
pub(crate) struct StreamWorker {
    ctx: Arc<ServerContext>,
    guard: ConnectionGuard,
    closing: Arc<AtomicBool>,
    flow: FlowControl,
    connection_id: ConnectionId,
    stream_id: u32,
    frames: UnboundedReceiver<StreamFrame>,
}

/// What the worker pulled off its queue.
enum Pop {
    Frame(StreamFrame),
    /// Reset, connection termination or closed queue.
    Gone,
}

impl StreamWorker {
    pub(crate) fn new(
        ctx: Arc<ServerContext>,
        guard: ConnectionGuard,
        closing: Arc<AtomicBool>,
        flow: FlowControl,
        connection_id: ConnectionId,
        stream_id: u32,
        frames: UnboundedReceiver<StreamFrame>,
    ) -> Self {
        Self {
            ctx,
            guard,
            closing,
            flow,
            connection_id,
            stream_id,
            frames,
        }
    }

    pub(crate) async fn run(mut self) {
        let stream_id = self.stream_id;
        if let Pop::Frame(opening) = self.pop().await {
            match opening {
                StreamFrame::Headers {
                    ref parts,
                    ref protocol,
                    end_stream,
                } => match H2HeaderView::from_parts(parts, protocol.as_deref())
                    .and_then(|view| Request::from_h2(view, self.connection_id, stream_id))
                {
                    Ok(request) if request.protocol().is_some() => {
                        self.bootstrap(request).await;
                    }
                    Ok(request) => self.serve(request, &opening, end_stream).await,
                    Err(err) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            stream_id,
                            error = %err,
                            "Malformed request head"
                        );
                        let mut response = self.response();
                        response.set_error(StatusCode::BAD_REQUEST, &err.to_string());
                        self.finish(&mut response).await;
                    }
                },
                other => {
                    tracing::warn!(stream_id, frame = other.kind(), "Stream opened without HEADERS");
                    self.guard
                        .with(|session| session.reset_stream(stream_id, Reason::PROTOCOL_ERROR));
                }
            }
        }
        self.guard.with(|session| session.release(stream_id));
        tracing::trace!(connection_id = %self.connection_id, stream_id, "Stream worker exited");
    }

    /// Pop the next frame, re-checking the closing flag on every timeout.
    async fn pop(&mut self) -> Pop {
        let timeout = Duration::from_millis(self.ctx.http2.stream_poll_timeout_ms);
        loop {
            match tokio::time::timeout(timeout, self.frames.recv()).await {
                Ok(Some(StreamFrame::Reset(reason))) => {
                    tracing::debug!(stream_id = self.stream_id, ?reason, "Stream reset by peer");
                    self.advance(StreamPhase::Ended);
                    return Pop::Gone;
                }
                Ok(Some(StreamFrame::ConnectionTerminated)) | Ok(None) => {
                    self.advance(StreamPhase::Ended);
                    return Pop::Gone;
                }
                Ok(Some(frame)) => {
                    if let StreamFrame::Data { data, .. } = &frame {
                        self.release_capacity(data.len());
                    }
                    return Pop::Frame(frame);
                }
                Err(_) if self.closing.load(Ordering::Acquire) => return Pop::Gone,
                Err(_) => continue,
            }
        }
    }

    fn release_capacity(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if let Err(err) = self.flow.release_capacity(len) {
            tracing::debug!(stream_id = self.stream_id, error = %err, "Could not release capacity");
        }
    }

    fn advance(&self, phase: StreamPhase) {
        let stream_id = self.stream_id;
        self.guard.with(|session| session.advance(stream_id, phase));
    }

    fn response(&self) -> Response<'static> {
        Response::new(H2Sink::new(self.guard.clone(), self.stream_id))
    }

    /// Ordinary request: rewrite once, route, pipe the body, respond.
    async fn serve(&mut self, mut request: Request<'static>, opening: &StreamFrame, end_stream: bool) {
        let ctx = Arc::clone(&self.ctx);
        ctx.rewriter.rewrite(&mut request);
        let mut response = self.response();
        if *request.method() == Method::HEAD {
            response.set_suppress_body(true);
        }

        let (mut pipe, reader) = body_pipe(ctx.limits.max_body_size);
        request.set_body(Body::streaming(reader));

        let handler = ctx.router.get_handler(&request);
        let mut frame_handler = handler.as_ref().and_then(|h| h.frame_handler(&request));
        let mut failure: Option<HandlerError> = None;

        if let Some(hooks) = frame_handler.as_mut() {
            if let Err(err) = hooks.handle_headers(opening, &mut request, &mut response).await {
                failure = Some(err);
            }
        }

        let mut oversized = false;
        let mut ended = end_stream;
        while !ended {
            let frame = match self.pop().await {
                Pop::Frame(frame) => frame,
                Pop::Gone => return,
            };
            ended = frame.ends_stream();
            match &frame {
                StreamFrame::Data { data, .. } => {
                    self.advance(StreamPhase::ReceivingData);
                    if failure.is_some() || oversized {
                        continue;
                    }
                    if let Err(err) = pipe.write(data).await {
                        tracing::debug!(stream_id = self.stream_id, error = %err, "Request body rejected");
                        oversized = true;
                        continue;
                    }
                    if let Some(hooks) = frame_handler.as_mut() {
                        if let Err(err) = hooks.handle_data(&frame, &mut request, &mut response).await
                        {
                            failure = Some(err);
                        }
                    }
                }
                StreamFrame::Trailers(trailers) => {
                    request
                        .headers_mut()
                        .extend(trailers.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                other => {
                    tracing::debug!(stream_id = self.stream_id, frame = other.kind(), "Ignoring frame");
                }
            }
        }
        pipe.close().await;
        self.advance(StreamPhase::Ended);

        let delay = ctx.latency.delay(&request);
        tokio::time::sleep(delay).await;

        match (handler, failure) {
            (None, _) => {
                response.set_error(
                    StatusCode::NOT_FOUND,
                    &format!("no handler for {} {}", request.method(), request.path()),
                );
            }
            (Some(_), _) if oversized => {
                response.set_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
            }
            (Some(_), Some(err)) => self.fail(&mut response, &err),
            (Some(handler), None) => {
                if let Err(err) = handler.handle(&mut request, &mut response).await {
                    self.fail(&mut response, &err);
                }
            }
        }

        tracing::debug!(
            connection_id = %self.connection_id,
            stream_id = self.stream_id,
            method = %request.method(),
            path = request.path(),
            body_bytes = pipe.written(),
            status = response.status().as_u16(),
            "Stream handled"
        );
        self.finish(&mut response).await;
    }

    fn fail(&self, response: &mut Response<'static>, err: &HandlerError) {
        if !respond_with_error(response, err) {
            let stream_id = self.stream_id;
            self.guard
                .with(|session| session.reset_stream(stream_id, Reason::INTERNAL_ERROR));
        }
    }

    /// Flush the response; errors only abandon this stream.
    async fn finish(&self, response: &mut Response<'static>) {
        let stream_id = self.stream_id;
        if self.guard.with(|session| session.is_locally_ended(stream_id)) {
            return;
        }
        if let Err(err) = response.finish().await {
            log_connection_error(
                format_args!("{}/{}", self.connection_id, self.stream_id),
                &err,
            );
        }
    }

    /// Extended CONNECT: handshake, then pipe DATA to the dispatcher.
    async fn bootstrap(&mut self, request: Request<'static>) {
        let ctx = Arc::clone(&self.ctx);
        let stream_id = self.stream_id;
        let mut response = self.response();

        match WebSocketHandshaker::new(ctx.dispatcher.as_ref()).handshake(&request, &mut response) {
            Ok(()) => {}
            Err(BootstrapError::Protocol(reason)) => {
                tracing::warn!(stream_id, %reason, "Rejecting extended CONNECT");
                self.guard
                    .with(|session| session.reset_stream(stream_id, Reason::PROTOCOL_ERROR));
                return;
            }
            Err(BootstrapError::Handshake(err)) => {
                tracing::debug!(stream_id, error = %err, "WebSocket handshake refused");
                response.set_error(err.status(), err.message());
                self.finish(&mut response).await;
                return;
            }
        }

        if let Err(err) = response.write_head().await {
            log_connection_error(format_args!("{}/{}", self.connection_id, stream_id), &err);
            return;
        }

        let (local, remote) = tokio::io::duplex(ctx.http2.websocket_pipe_capacity);
        let dispatcher = Arc::clone(&ctx.dispatcher);
        let path = request.path().to_string();
        let dispatch: JoinHandle<()> =
            tokio::spawn(async move { dispatcher.dispatch(path, remote).await });

        let (mut outbound, mut inbound) = tokio::io::split(local);
        let guard = self.guard.clone();
        let mut transfer: JoinHandle<()> = tokio::spawn(async move {
            let mut buf = vec![0u8; PIPE_READ_CHUNK];
            loop {
                let n = match outbound.read(&mut buf).await {
                    Ok(n) => n,
                    Err(err) => {
                        tracing::debug!(stream_id, error = %err, "WebSocket pipe read failed");
                        0
                    }
                };
                let sent = if n == 0 {
                    guard.with(|session| session.end_stream(stream_id)).map(|_| ())
                } else {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    guard.send_body(stream_id, chunk, false).await
                };
                if let Err(err) = sent {
                    tracing::debug!(stream_id, error = %err, "WebSocket transfer stopped");
                    break;
                }
                if n == 0 {
                    break;
                }
            }
        });

        let timeout = Duration::from_millis(ctx.http2.stream_poll_timeout_ms);
        let mut inbound_open = true;
        loop {
            tokio::select! {
                _ = &mut transfer => break,
                popped = self.pop(), if inbound_open => match popped {
                    Pop::Frame(StreamFrame::Data { data, end_stream }) => {
                        self.advance(StreamPhase::ReceivingData);
                        if inbound.write_all(&data).await.is_err() || end_stream {
                            let _ = inbound.shutdown().await;
                            inbound_open = false;
                            self.advance(StreamPhase::Ended);
                        }
                    }
                    Pop::Frame(StreamFrame::Trailers(_)) => {
                        let _ = inbound.shutdown().await;
                        inbound_open = false;
                        self.advance(StreamPhase::Ended);
                    }
                    Pop::Frame(_) => {}
                    Pop::Gone => {
                        transfer.abort();
                        break;
                    }
                },
                _ = tokio::time::sleep(timeout), if !inbound_open => {
                    if self.closing.load(Ordering::Acquire) {
                        transfer.abort();
                        break;
                    }
                }
            }
        }

        dispatch.abort();
        tracing::debug!(connection_id = %self.connection_id, stream_id, "WebSocket stream closed");
    }
}

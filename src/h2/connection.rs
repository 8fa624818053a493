//! HTTP/2 connection reader.
//!
//! # Responsibilities
//! - Run the server handshake with extended CONNECT advertised
//! - Demultiplex stream events into per-stream queues
//! - Spawn one worker per stream and join them all before returning
//!
//! # Design Decisions
//! - One reader loop per connection; workers never read from the socket
//! - Connection termination is broadcast as a frame, not by cancelling tasks

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{BoxStream, SelectAll, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;

use crate::h2::frame::{body_frames, StreamFrame};
use crate::h2::guard::{ConnectionGuard, StreamPhase};
use crate::h2::worker::StreamWorker;
use crate::http::server::ServerContext;
use crate::net::connection::ConnectionId;
use crate::net::errors::is_acceptable_h2;

/// Connection lifecycle as seen by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    SettingsSent,
    ReadingFrames,
    Terminating,
    Closed,
}

/// Serves one HTTP/2 connection.
pub struct Http2ConnectionHandler {
    ctx: Arc<ServerContext>,
    connection_id: ConnectionId,
    state: ConnectionState,
    guard: ConnectionGuard,
    closing: Arc<AtomicBool>,
    queues: HashMap<u32, UnboundedSender<StreamFrame>>,
    workers: JoinSet<()>,
}

impl Http2ConnectionHandler {
    pub fn new(ctx: Arc<ServerContext>, connection_id: ConnectionId) -> Self {
        Self {
            ctx,
            connection_id,
            state: ConnectionState::Init,
            guard: ConnectionGuard::default(),
            closing: Arc::new(AtomicBool::new(false)),
            queues: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve `io` until the connection closes.
    ///
    /// Every stream worker has exited by the time this returns.
    pub async fn serve<S>(mut self, io: S) -> Result<(), h2::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = h2::server::Builder::new();
        builder
            .enable_connect_protocol()
            .max_concurrent_streams(self.ctx.http2.max_concurrent_streams);
        let mut conn = match builder.handshake::<_, Bytes>(io).await {
            Ok(conn) => conn,
            Err(err) => {
                self.transition(ConnectionState::Closed);
                return Err(err);
            }
        };
        self.transition(ConnectionState::SettingsSent);

        let mut bodies: SelectAll<BoxStream<'static, (u32, StreamFrame)>> = SelectAll::new();
        self.transition(ConnectionState::ReadingFrames);

        let result = loop {
            tokio::select! {
                accepted = conn.accept() => match accepted {
                    Some(Ok((request, respond))) => {
                        let stream_id = respond.stream_id().as_u32();
                        let (parts, mut body) = request.into_parts();
                        let protocol = parts
                            .extensions
                            .get::<h2::ext::Protocol>()
                            .map(|p| p.as_str().to_string());
                        let end_stream = body.is_end_stream();
                        let flow = body.flow_control().clone();

                        self.guard.with(|session| {
                            session.open_stream(stream_id, respond);
                            session.advance(stream_id, StreamPhase::HeadersReceived);
                        });
                        self.spawn_worker(stream_id, flow);
                        self.deliver(stream_id, StreamFrame::Headers { parts, protocol, end_stream });
                        if !end_stream {
                            bodies.push(body_frames(stream_id, body));
                        }
                    }
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                },
                Some((stream_id, frame)) = bodies.next(), if !bodies.is_empty() => {
                    self.deliver(stream_id, frame);
                }
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(connection_id = %self.connection_id, error = %err, "Stream worker panicked");
                        }
                    }
                }
            }
        };

        self.transition(ConnectionState::Terminating);
        drop(bodies);
        drop(conn);
        self.terminate().await;
        self.transition(ConnectionState::Closed);

        match result {
            Err(err) if is_acceptable_h2(&err) => {
                tracing::debug!(connection_id = %self.connection_id, error = %err, "HTTP/2 peer went away");
                Ok(())
            }
            other => other,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            connection_id = %self.connection_id,
            from = ?self.state,
            to = ?next,
            "HTTP/2 connection state"
        );
        self.state = next;
    }

    fn spawn_worker(&mut self, stream_id: u32, flow: h2::FlowControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(stream_id, tx);
        let worker = StreamWorker::new(
            Arc::clone(&self.ctx),
            self.guard.clone(),
            Arc::clone(&self.closing),
            flow,
            self.connection_id,
            stream_id,
            rx,
        );
        self.workers.spawn(worker.run());
        tracing::debug!(connection_id = %self.connection_id, stream_id, "Stream opened");
    }

    /// Push a frame to its stream's queue, forgetting the id once it ends.
    fn deliver(&mut self, stream_id: u32, frame: StreamFrame) {
        let mut forget = frame.ends_stream();
        if let Some(queue) = self.queues.get(&stream_id) {
            if queue.send(frame).is_err() {
                tracing::trace!(stream_id, "Worker already gone; dropping frame");
                forget = true;
            }
        }
        if forget {
            self.queues.remove(&stream_id);
        }
    }

    /// Broadcast termination and wait for every worker.
    async fn terminate(&mut self) {
        self.closing.store(true, Ordering::Release);
        for (_, queue) in self.queues.drain() {
            let _ = queue.send(StreamFrame::ConnectionTerminated);
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    tracing::error!(connection_id = %self.connection_id, error = %err, "Stream worker panicked");
                }
            }
        }
        let leaked = self.guard.with(|session| session.live_streams());
        if leaked > 0 {
            tracing::warn!(connection_id = %self.connection_id, leaked, "Streams left after teardown");
        }
    }
}

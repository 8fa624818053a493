//! Server setup and per-connection dispatch.
//!
//! # Responsibilities
//! - Bind the listener and load TLS material at startup
//! - Accept connections until shutdown is signalled
//! - Hand each connection to the HTTP/1.1 or HTTP/2 handler by protocol
//! - Hold the state every connection shares (`ServerContext`)
//!
//! # Design Decisions
//! - One task per connection; HTTP/2 adds one task per stream
//! - Startup failures (bind, TLS files) are fatal; connection failures are logged
//! - Shutdown stops accepting; in-flight connections finish on their own

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::config::{Http2Config, LimitsConfig, Protocol, ServerConfig};
use crate::h2::{Http2ConnectionHandler, WebSocketDispatcher};
use crate::http::http1::Http1ConnectionHandler;
use crate::http::rewrite::RequestRewriter;
use crate::http::{HandlerError, Request, Response};
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::errors::log_connection_error;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls::{load_acceptor, TlsError, ALPN_H2};
use crate::routing::Router;

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("protocol {0} requires a [listener.tls] section")]
    MissingTls(Protocol),
}

/// Artificial delay applied right before a handler runs.
#[derive(Clone, Default)]
pub enum Latency {
    #[default]
    None,
    Fixed(Duration),
    /// Computed per request.
    Computed(Arc<dyn Fn(&Request<'_>) -> Duration + Send + Sync>),
}

impl Latency {
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) if ms > 0 => Latency::Fixed(Duration::from_millis(ms)),
            _ => Latency::None,
        }
    }

    pub fn delay(&self, request: &Request<'_>) -> Duration {
        match self {
            Latency::None => Duration::ZERO,
            Latency::Fixed(delay) => *delay,
            Latency::Computed(f) => f(request),
        }
    }
}

impl std::fmt::Debug for Latency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Latency::None => f.write_str("None"),
            Latency::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Latency::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// State shared by every connection of one server.
pub struct ServerContext {
    pub rewriter: RequestRewriter,
    pub router: Arc<dyn Router>,
    pub dispatcher: Arc<dyn WebSocketDispatcher>,
    pub latency: Latency,
    pub limits: LimitsConfig,
    pub http2: Http2Config,
    /// Present when plaintext CONNECT switches the socket to TLS.
    pub encrypt_after_connect: Option<TlsAcceptor>,
}

impl ServerContext {
    pub fn new(router: Arc<dyn Router>, dispatcher: Arc<dyn WebSocketDispatcher>) -> Self {
        Self {
            rewriter: RequestRewriter::new(),
            router,
            dispatcher,
            latency: Latency::None,
            limits: LimitsConfig::default(),
            http2: Http2Config::default(),
            encrypt_after_connect: None,
        }
    }

    /// Build the context a config file describes.
    pub fn from_config(
        config: &ServerConfig,
        router: Arc<dyn Router>,
        dispatcher: Arc<dyn WebSocketDispatcher>,
    ) -> Result<Self, ServerError> {
        let encrypt_after_connect = if config.listener.encrypt_after_connect {
            let tls = config
                .listener
                .tls
                .as_ref()
                .ok_or(ServerError::MissingTls(config.listener.protocol))?;
            Some(load_acceptor(Path::new(&tls.cert_path), Path::new(&tls.key_path), &[])?)
        } else {
            None
        };

        Ok(Self {
            rewriter: RequestRewriter::from_rules(&config.rewrites),
            router,
            dispatcher,
            latency: Latency::from_millis(config.latency_ms),
            limits: config.limits.clone(),
            http2: config.http2.clone(),
            encrypt_after_connect,
        })
    }
}

/// Turn a handler failure into an error response.
///
/// Returns `false` when the head is already on the wire and the exchange has
/// to be aborted instead.
pub(crate) fn respond_with_error(response: &mut Response<'_>, err: &HandlerError) -> bool {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err.report(), "Handler failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %err.report(), "Handler rejected request");
    }
    if response.is_head_sent() {
        tracing::warn!(
            status = status.as_u16(),
            "Handler failed after the response head was sent; aborting"
        );
        return false;
    }
    response.set_error(status, &err.report());
    true
}

/// A bound, not yet running, server.
pub struct Server {
    listener: Listener,
    protocol: Protocol,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ServerContext>,
    tracker: ConnectionTracker,
}

impl Server {
    /// Bind the listener and load TLS material.
    pub async fn bind(config: &ServerConfig, ctx: ServerContext) -> Result<Self, ServerError> {
        let protocol = config.listener.protocol;
        let tls = if protocol.is_tls() {
            let tls = config
                .listener
                .tls
                .as_ref()
                .ok_or(ServerError::MissingTls(protocol))?;
            let alpn: &[&[u8]] = match protocol {
                Protocol::H2 => &[ALPN_H2],
                _ => &[],
            };
            Some(load_acceptor(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
                alpn,
            )?)
        } else {
            None
        };

        let listener = Listener::bind(&config.listener).await?;
        Ok(Self {
            listener,
            protocol,
            tls,
            ctx: Arc::new(ctx),
            tracker: ConnectionTracker::new(),
        })
    }

    /// The bound address; reports the real port when bound to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        tracing::info!(
            address = %self.local_addr().map_err(ListenerError::Accept)?,
            protocol = %self.protocol,
            encrypt_after_connect = self.ctx.encrypt_after_connect.is_some(),
            "Server accepting connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                    }
                }
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Server stopped"
        );
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let ctx = Arc::clone(&self.ctx);
        let tls = self.tls.clone();
        let protocol = self.protocol;
        let guard = self.tracker.track();

        tokio::spawn(async move {
            let _permit = permit;
            let connection_id = guard.id();
            tracing::debug!(%connection_id, %peer, %protocol, "Connection opened");

            if let Err(err) = serve_connection(ctx, protocol, tls, stream, connection_id).await {
                log_connection_error(connection_id, &err);
            }

            tracing::debug!(%connection_id, %peer, "Connection closed");
            drop(guard);
        });
    }
}

async fn serve_connection(
    ctx: Arc<ServerContext>,
    protocol: Protocol,
    tls: Option<TlsAcceptor>,
    stream: TcpStream,
    connection_id: ConnectionId,
) -> std::io::Result<()> {
    let acceptor = || {
        tls.clone().ok_or_else(|| {
            std::io::Error::other(format!("{protocol} listener without TLS acceptor"))
        })
    };

    match protocol {
        Protocol::Http => {
            Http1ConnectionHandler::new(ctx, connection_id, "http")
                .serve(Box::new(stream))
                .await
        }
        Protocol::Https => {
            let stream = acceptor()?.accept(stream).await?;
            Http1ConnectionHandler::new(ctx, connection_id, "https")
                .serve(Box::new(stream))
                .await
        }
        Protocol::H2 => {
            let stream = acceptor()?.accept(stream).await?;
            if stream.get_ref().1.alpn_protocol() != Some(ALPN_H2) {
                tracing::debug!(%connection_id, "Client did not negotiate h2; assuming prior knowledge");
            }
            Http2ConnectionHandler::new(ctx, connection_id)
                .serve(stream)
                .await
                .map_err(|err| match err.get_io() {
                    Some(io) => std::io::Error::new(io.kind(), err),
                    None => std::io::Error::other(err),
                })
        }
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared context from configuration
//! - Bind the listener and load TLS material
//! - Spawn the accept loop wired to a shutdown coordinator
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned before traffic is accepted
//! - The caller owns the handle and decides when to stop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::h2::WebSocketDispatcher;
use crate::http::{Server, ServerContext, ServerError};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::routing::Router;

/// A server whose accept loop is running on its own task.
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    /// Address actually bound (reports the real port for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Stop accepting, then give open connections `deadline` to finish.
    pub async fn stop(self, deadline: Duration) -> bool {
        let drained = self.shutdown.drain(&self.tracker, deadline).await;
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Accept loop failed"),
            Err(err) => tracing::error!(error = %err, "Accept loop panicked"),
        }
        drained
    }
}

/// Bind according to `config` and start serving with the default context.
pub async fn start(
    config: &ServerConfig,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn WebSocketDispatcher>,
) -> Result<RunningServer, ServerError> {
    let ctx = ServerContext::from_config(config, router, dispatcher)?;
    start_with_context(config, ctx).await
}

/// Like [`start`], with a caller-built context (custom latency, rewrites).
pub async fn start_with_context(
    config: &ServerConfig,
    ctx: ServerContext,
) -> Result<RunningServer, ServerError> {
    let server = Server::bind(config, ctx).await?;
    let local_addr = server
        .local_addr()
        .map_err(crate::net::listener::ListenerError::Bind)?;
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(shutdown.subscribe()));

    tracing::info!(address = %local_addr, protocol = %config.listener.protocol, "Server started");

    Ok(RunningServer {
        local_addr,
        shutdown,
        tracker,
        task,
    })
}

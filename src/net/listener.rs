//! Listening socket.
//!
//! # Responsibilities
//! - Bind the configured host and port (port 0 picks an ephemeral port)
//! - Accept TCP connections with Nagle disabled
//! - Cap concurrently served connections with a semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// TCP listener that stops accepting while `max_connections` are being served.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(config.bind_address())
            .await
            .map_err(ListenerError::Bind)?;
        let address = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            %address,
            protocol = %config.protocol,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// Wait for a free slot, then for a client.
    ///
    /// The returned permit must live as long as the connection is served.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::Accept(std::io::Error::other(e)))?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::trace!(%peer, error = %err, "Could not disable Nagle");
        }

        tracing::trace!(%peer, free_slots = self.slots.available_permits(), "Accepted");
        Ok((stream, peer, ConnectionPermit(permit)))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One connection slot; released on drop, even if the connection task panics.
#[derive(Debug)]
pub struct ConnectionPermit(#[allow(dead_code)] OwnedSemaphorePermit);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let config = ListenerConfig {
            port: 0,
            max_connections: 2,
            ..Default::default()
        };
        let listener = Listener::bind(&config).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert_eq!(listener.available_slots(), 2);
    }

    #[tokio::test]
    async fn slot_is_held_until_permit_drops() {
        let config = ListenerConfig {
            port: 0,
            max_connections: 1,
            ..Default::default()
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_slots(), 0);
        drop(permit);
        assert_eq!(listener.available_slots(), 1);
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let first = Listener::bind(&ListenerConfig {
            port: 0,
            ..Default::default()
        })
        .await
        .unwrap();
        let taken = first.local_addr().unwrap().port();

        let err = Listener::bind(&ListenerConfig {
            port: taken,
            ..Default::default()
        })
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ListenerError::Bind(_)));
    }
}

//! WebSocket echo over an RFC 8441 stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::h2::WebSocketDispatcher;

/// Subprotocol this dispatcher agrees to when offered.
pub const ECHO_PROTOCOL: &str = "echo";

/// Sends every text and binary message straight back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoDispatcher;

#[async_trait]
impl WebSocketDispatcher for EchoDispatcher {
    fn select_protocol(&self, offered: &[&str]) -> Option<String> {
        offered
            .iter()
            .find(|p| p.eq_ignore_ascii_case(ECHO_PROTOCOL))
            .map(|_| ECHO_PROTOCOL.to_string())
    }

    async fn dispatch(&self, path: String, io: DuplexStream) {
        let mut ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
        tracing::debug!(%path, "WebSocket session started");

        let mut echoed = 0u64;
        while let Some(message) = ws.next().await {
            match message {
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    if let Err(err) = ws.send(message).await {
                        tracing::debug!(%path, error = %err, "WebSocket send failed");
                        break;
                    }
                    echoed += 1;
                }
                // Pings are answered and closes acknowledged by the protocol layer.
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(%path, error = %err, "WebSocket read failed");
                    break;
                }
            }
        }
        tracing::debug!(%path, echoed, "WebSocket session ended");
    }
}

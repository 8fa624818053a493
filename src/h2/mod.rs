//! HTTP/2 subsystem.
//!
//! # Data Flow
//! ```text
//! TLS stream (ALPN h2)
//!     → connection.rs (handshake, single reader loop)
//!     → frame.rs (stream events as StreamFrame)
//!     → per-stream queue
//!     → worker.rs (one task per stream)
//!         → pipe.rs (DATA payloads into the request body)
//!         → router + handler, or websocket.rs (RFC 8441 bootstrap)
//!     → guard.rs (every write to the shared session)
//! ```

pub mod connection;
pub mod frame;
pub mod guard;
mod pipe;
pub mod websocket;
pub mod worker;

pub use connection::{ConnectionState, Http2ConnectionHandler};
pub use frame::StreamFrame;
pub use guard::{ConnectionGuard, H2Session, SessionError, StreamPhase};
pub use websocket::{BootstrapError, HandshakeError, WebSocketDispatcher, WebSocketHandshaker};
pub use worker::H2Sink;

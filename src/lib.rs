//! HTTP(S) test server.
//!
//! Serves HTTP/1.1, HTTPS/1.1 and HTTP/2 over TLS from one configurable
//! listener, with path rewriting, injected latency, per-stream HTTP/2
//! workers and WebSocket bootstrapping over HTTP/2 (RFC 8441).

// Core subsystems
pub mod config;
pub mod h2;
pub mod http;
pub mod net;
pub mod routing;

// Built-in endpoints
pub mod handlers;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use http::{Server, ServerContext};
pub use lifecycle::Shutdown;

//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (TLS handshake now, or after a plaintext CONNECT)
//!     → connection.rs (identity, lifecycle tracking)
//!     → Hand off to HTTP/1.1 or HTTP/2 handler
//!
//! Failures anywhere above:
//!     → errors.rs (benign disconnect vs. real fault)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so teardown is observable
//! - TLS material is loaded once at startup

pub mod connection;
pub mod errors;
pub mod listener;
pub mod tls;

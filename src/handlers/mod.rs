//! Built-in handlers.
//!
//! The binary serves these by default; tests use them as known-good endpoints.

pub mod echo;
pub mod websocket;

pub use echo::EchoHandler;
pub use websocket::EchoDispatcher;

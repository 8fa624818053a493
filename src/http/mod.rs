//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept, protocol selection, shared context)
//!     → http1.rs (HTTP/1.1 loop) or crate::h2 (HTTP/2 streams)
//!     → request.rs (method, URL, headers, body)
//!     → rewrite.rs (path rewrite before routing)
//!     → [routing layer picks the handler]
//!     → response.rs (status, headers, body through a protocol sink)
//!     → Send to client
//! ```

pub mod body;
pub mod error;
pub mod http1;
pub mod request;
pub mod response;
pub mod rewrite;
pub mod server;

pub use body::{Body, BodyReader};
pub use error::{HandlerError, HttpError};
pub use request::{H2HeaderView, Request};
pub use response::{Response, ResponseSink};
pub use rewrite::RequestRewriter;
pub use server::{Latency, Server, ServerContext, ServerError};

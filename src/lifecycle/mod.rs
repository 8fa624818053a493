//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → ServerContext → bind listener (+ TLS) → spawn accept loop
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → wait for connections to drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Bind errors surface from `start`, before any traffic is accepted
//! - Shutdown has a deadline: connections still open after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, start_with_context, RunningServer};

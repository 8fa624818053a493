//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with connection_id / stream_id fields
//!     → logging.rs (subscriber: env filter + fmt layer)
//! ```
//!
//! # Design Decisions
//! - Structured fields over formatted strings
//! - Connection and stream ids flow through every event
//! - `RUST_LOG` overrides the configured level

pub mod logging;

pub use logging::init_logging;

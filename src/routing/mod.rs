//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Rewritten Request (method, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: Arc<dyn Handler> or None (caller answers 404)
//!
//! Route Compilation (at startup):
//!     (methods, pattern, handler)[]
//!     → Compile matchers (method set, exact/prefix path)
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - The server core only depends on the `Router` and `Handler` traits
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use router::{FrameHandler, Handler, RouteTable, Router};

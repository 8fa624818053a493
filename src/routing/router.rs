//! Handler lookup.
//!
//! # Responsibilities
//! - Define the handler contracts the connection handlers call into
//! - Store an ordered route table
//! - Look up the handler for a (rewritten) request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - First match wins (registration order)
//! - Explicit `None` rather than a silent default; the caller answers 404
//! - Per-frame HTTP/2 processing is an opt-in capability on `Handler`

use std::sync::Arc;

use async_trait::async_trait;

use crate::h2::frame::StreamFrame;
use crate::http::{HandlerError, Request, Response};
use crate::routing::matcher::{AndMatcher, Matcher, MethodMatcher, PathMatcher};

/// Produces the response for a request.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the full request/response cycle.
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), HandlerError>;

    /// Per-frame hooks for HTTP/2 streams.
    ///
    /// The request body stays readable from [`handle`](Self::handle) either way.
    fn frame_handler(&self, _request: &Request<'_>) -> Option<Box<dyn FrameHandler>> {
        None
    }
}

/// Stream-aware hooks invoked for every frame of an HTTP/2 stream, before the
/// full cycle runs at end of stream.
#[async_trait]
pub trait FrameHandler: Send {
    async fn handle_headers(
        &mut self,
        _frame: &StreamFrame,
        _request: &mut Request<'static>,
        _response: &mut Response<'static>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle_data(
        &mut self,
        _frame: &StreamFrame,
        _request: &mut Request<'static>,
        _response: &mut Response<'static>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Maps a request to its handler.
pub trait Router: Send + Sync {
    fn get_handler(&self, request: &Request<'_>) -> Option<Arc<dyn Handler>>;
}

/// A compiled route.
struct Route {
    matcher: AndMatcher,
    handler: Arc<dyn Handler>,
}

/// Ordered route table; the first matching route wins.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. `pattern` is an exact path or a prefix ending in `*`.
    pub fn route<I, S>(mut self, methods: I, pattern: &str, handler: Arc<dyn Handler>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let matcher = AndMatcher::new(vec![
            Box::new(MethodMatcher::new(methods)) as Box<dyn Matcher>,
            Box::new(PathMatcher::new(pattern)),
        ]);
        tracing::debug!(pattern, "Route registered");
        self.routes.push(Route { matcher, handler });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for RouteTable {
    fn get_handler(&self, request: &Request<'_>) -> Option<Arc<dyn Handler>> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(request))
            .map(|route| Arc::clone(&route.handler))
    }
}

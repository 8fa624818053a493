//! Handler error taxonomy.
//!
//! # Responsibilities
//! - Typed HTTP errors carrying a status code
//! - Untyped handler failures (always 500)
//! - Decide what an error response reports to the client
//!
//! # Design Decisions
//! - 5xx responses report the underlying cause so the original fault is visible
//! - 4xx responses report only the error's own message

use http::StatusCode;

/// Boxed error type accepted from handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error with an explicit HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("{status}{}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
pub struct HttpError {
    status: StatusCode,
    message: Option<String>,
    #[source]
    cause: Option<BoxError>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            cause: None,
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// Attach the underlying failure.
    pub fn caused_by(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

/// Failure returned by a [`Handler`](crate::routing::Handler).
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("handler failed: {0}")]
    Other(BoxError),
}

impl HandlerError {
    /// Wrap any error as an untyped failure.
    pub fn other(err: impl Into<BoxError>) -> Self {
        HandlerError::Other(err.into())
    }

    /// Status code the client should see.
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Http(e) => e.status(),
            HandlerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the error body.
    ///
    /// Server errors show the underlying cause (or the whole error chain for
    /// untyped failures); client errors show only their own message.
    pub fn report(&self) -> String {
        match self {
            HandlerError::Http(e) if e.status().is_server_error() => match e.cause() {
                Some(cause) => error_chain(cause),
                None => e.to_string(),
            },
            HandlerError::Http(e) => e
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| e.status().canonical_reason().unwrap_or("").to_string()),
            HandlerError::Other(e) => error_chain(e.as_ref()),
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Render an error and all of its sources, outermost first.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Protocol/TLS consistency (https and h2 need certificates)
//! - Validate value ranges (limits > 0)
//! - Sanity-check rewrite rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{Protocol, ServerConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    if listener.protocol.is_tls() && listener.tls.is_none() {
        errors.push(ValidationError::new(
            "listener.tls",
            format!("protocol {} requires a certificate and key", listener.protocol),
        ));
    }

    if listener.encrypt_after_connect {
        if listener.protocol != Protocol::Http {
            errors.push(ValidationError::new(
                "listener.encrypt_after_connect",
                "only supported with the http protocol",
            ));
        }
        if listener.tls.is_none() {
            errors.push(ValidationError::new(
                "listener.encrypt_after_connect",
                "requires listener.tls",
            ));
        }
    }

    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.limits.max_request_line == 0 {
        errors.push(ValidationError::new("limits.max_request_line", "must be > 0"));
    }
    if config.limits.max_headers == 0 {
        errors.push(ValidationError::new("limits.max_headers", "must be > 0"));
    }
    if config.http2.stream_poll_timeout_ms == 0 {
        errors.push(ValidationError::new("http2.stream_poll_timeout_ms", "must be > 0"));
    }
    if config.http2.websocket_pipe_capacity == 0 {
        errors.push(ValidationError::new("http2.websocket_pipe_capacity", "must be > 0"));
    }

    for (i, rule) in config.rewrites.iter().enumerate() {
        if rule.methods.is_empty() {
            errors.push(ValidationError::new(
                format!("rewrites[{}].methods", i),
                "at least one method (or \"*\") is required",
            ));
        }
        if !rule.input.starts_with('/') {
            errors.push(ValidationError::new(
                format!("rewrites[{}].input", i),
                "must start with '/'",
            ));
        }
        if !rule.output.starts_with('/') {
            errors.push(ValidationError::new(
                format!("rewrites[{}].output", i),
                "must start with '/'",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the test server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the test server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, protocol, TLS).
    pub listener: ListenerConfig,

    /// Request parsing limits.
    pub limits: LimitsConfig,

    /// HTTP/2 connection settings.
    pub http2: Http2Config,

    /// Fixed latency applied before every handler invocation.
    pub latency_ms: Option<u64>,

    /// Path rewrite rules, in configuration order.
    pub rewrites: Vec<RewriteConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Wire protocol served on the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP/1.1.
    #[default]
    Http,
    /// HTTP/1.1 over TLS.
    Https,
    /// HTTP/2 over TLS (ALPN `h2`).
    H2,
}

impl Protocol {
    /// Whether this protocol wraps every connection in TLS on accept.
    pub fn is_tls(&self) -> bool {
        matches!(self, Protocol::Https | Protocol::H2)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::H2 => write!(f, "h2"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "127.0.0.1").
    pub host: String,

    /// Bind port. 0 picks an ephemeral port.
    pub port: u16,

    /// Protocol served on this listener.
    pub protocol: Protocol,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Answer CONNECT in plaintext, then switch the same socket to TLS.
    pub encrypt_after_connect: bool,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            protocol: Protocol::Http,
            tls: None,
            encrypt_after_connect: false,
            max_connections: 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Limits applied while reading requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum length of an HTTP/1.1 request line (and of each header line).
    pub max_request_line: usize,

    /// Maximum number of header fields per HTTP/1.1 request.
    pub max_headers: usize,

    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_line: 65536,
            max_headers: 512,
            max_body_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// HTTP/2 connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http2Config {
    /// How long a stream worker waits on its queue before re-checking shutdown.
    pub stream_poll_timeout_ms: u64,

    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to peers.
    pub max_concurrent_streams: u32,

    /// Buffer size of the pipe between a WebSocket stream and its dispatcher.
    pub websocket_pipe_capacity: usize,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            stream_poll_timeout_ms: 1000,
            max_concurrent_streams: 256,
            websocket_pipe_capacity: 64 * 1024,
        }
    }
}

/// A single path rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RewriteConfig {
    /// Methods the rule applies to; `"*"` matches any method.
    pub methods: Vec<String>,

    /// Request path to match exactly.
    pub input: String,

    /// Replacement path.
    pub output: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.limits.max_headers, 512);
        assert_eq!(config.limits.max_request_line, 65536);
        assert_eq!(config.http2.stream_poll_timeout_ms, 1000);
        assert!(config.rewrites.is_empty());
    }

    #[test]
    fn parses_rewrites_in_order() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            protocol = "h2"
            port = 0

            [listener.tls]
            cert_path = "cert.pem"
            key_path = "key.pem"

            [[rewrites]]
            methods = ["GET"]
            input = "/a"
            output = "/first"

            [[rewrites]]
            methods = ["*"]
            input = "/a"
            output = "/second"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.protocol, Protocol::H2);
        assert_eq!(config.rewrites.len(), 2);
        assert_eq!(config.rewrites[0].output, "/first");
        assert_eq!(config.rewrites[1].output, "/second");
    }

    #[test]
    fn ipv6_bind_address_is_bracketed() {
        let listener = ListenerConfig {
            host: "::1".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(listener.bind_address(), "[::1]:9000");
    }
}

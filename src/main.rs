//! HTTP(S) test server binary.
//!
//! ```text
//! CLI flags / config file
//!     → config (validate)
//!     → lifecycle::startup (bind, TLS)
//!     → http::server accept loop
//!         → HTTP/1.1 handler or HTTP/2 reader + stream workers
//!     → routing (echo on every path, WebSocket echo over extended CONNECT)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use test_server::config::{self, Protocol, ServerConfig, TlsConfig};
use test_server::handlers::{EchoDispatcher, EchoHandler};
use test_server::lifecycle::{self, wait_for_signal};
use test_server::observability::init_logging;
use test_server::routing::RouteTable;

/// How long open connections get to finish after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "test-server", version, about = "HTTP/1.1, HTTPS and HTTP/2 test server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    /// Port to bind; 0 picks an ephemeral port.
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, value_enum)]
    protocol: Option<CliProtocol>,

    /// PEM certificate chain.
    #[arg(long, requires = "key")]
    cert: Option<String>,

    /// PEM private key.
    #[arg(long, requires = "cert")]
    key: Option<String>,

    /// Answer CONNECT with 200 and continue over TLS on the same socket.
    #[arg(long)]
    encrypt_after_connect: bool,

    /// Fixed delay before every handler, in milliseconds.
    #[arg(long)]
    latency_ms: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliProtocol {
    Http,
    Https,
    H2,
}

impl From<CliProtocol> for Protocol {
    fn from(p: CliProtocol) -> Self {
        match p {
            CliProtocol::Http => Protocol::Http,
            CliProtocol::Https => Protocol::Https,
            CliProtocol::H2 => Protocol::H2,
        }
    }
}

impl Cli {
    /// Apply flag overrides on top of the loaded (or default) config.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.listener.host = host;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(protocol) = self.protocol {
            config.listener.protocol = protocol.into();
        }
        if let (Some(cert_path), Some(key_path)) = (self.cert, self.key) {
            config.listener.tls = Some(TlsConfig { cert_path, key_path });
        }
        if self.encrypt_after_connect {
            config.listener.encrypt_after_connect = true;
        }
        if self.latency_ms.is_some() {
            config.latency_ms = self.latency_ms;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    let config = cli.apply(base);
    if let Err(errors) = config::validation::validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "test-server starting");

    let router = RouteTable::new().route(["*"], "/*", Arc::new(EchoHandler::new()));
    let server = lifecycle::start(&config, Arc::new(router), Arc::new(EchoDispatcher)).await?;
    tracing::info!(address = %server.local_addr(), "Listening for connections");

    wait_for_signal().await;
    let drained = server.stop(DRAIN_DEADLINE).await;
    tracing::info!(drained, "test-server stopped");
    Ok(())
}

//! Configuration for the Kinetic client
//!
//! Centralized configuration with sensible defaults. Everything here is an
//! environment-level knob of the embedding application, not a contract of
//! the protocol.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KineticError, Result};

/// Default device port
pub const DEFAULT_PORT: u16 = 8123;

/// Default TLS device port
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Development identity
pub const DEFAULT_IDENTITY: i64 = 1;

/// Development secret
pub const DEFAULT_SECRET: &[u8] = b"asdfasdf";

/// Main configuration for a client connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------
    pub hostname: String,
    pub port: u16,

    /// Upgrade the socket to TLS after connecting
    pub tls: Option<TlsOptions>,

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    pub identity: i64,
    pub secret: Vec<u8>,

    /// Expected cluster version. When unset the device's version is adopted
    /// at connect time.
    pub cluster_version: Option<i64>,

    /// PIN used by lock/unlock/erase when none is passed explicitly
    pub pin: Option<Vec<u8>>,

    // -------------------------------------------------------------------------
    // Socket
    // -------------------------------------------------------------------------
    pub connect_timeout: Duration,

    /// Read/write timeout on the established socket (None blocks forever)
    pub socket_timeout: Option<Duration>,

    /// Size of the pieces values are written in
    pub chunk_size: usize,

    /// How value bytes move between files and the socket
    pub value_transfer: TransferMode,

    // -------------------------------------------------------------------------
    // Pipelining
    // -------------------------------------------------------------------------
    /// Ceiling on unacknowledged requests for the pipelined strategies
    pub max_outstanding: usize,

    /// Capacity of the outbound request queue
    pub queue_capacity: usize,

    /// Default depth of the bulk get/put/delete helpers
    pub pipeline_depth: usize,

    /// Keys requested per range page
    pub range_page_size: u32,

    /// Outstanding entry fetches while iterating a range
    pub range_prefetch: usize,
}

/// TLS options
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM bundle of trusted roots. Devices ship self-signed certificates, so
    /// without a bundle any server certificate is accepted.
    pub ca_file: Option<PathBuf>,

    /// Name to verify the certificate against (defaults to the hostname)
    pub server_name: Option<String>,
}

/// Value transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Copy through a user-space buffer, `chunk_size` at a time
    Buffered,

    /// Move bytes with splice(2) where the platform allows it
    Splice,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            tls: None,
            identity: DEFAULT_IDENTITY,
            secret: DEFAULT_SECRET.to_vec(),
            cluster_version: None,
            pin: None,
            connect_timeout: Duration::from_millis(100),
            socket_timeout: Some(Duration::from_secs(5)),
            chunk_size: 64 * 1024, // 64 KB
            value_transfer: TransferMode::Buffered,
            max_outstanding: 10,
            queue_capacity: 64,
            pipeline_depth: 16,
            range_page_size: 200,
            range_prefetch: 64,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults for a TLS device connection
    pub fn secure() -> Self {
        Self {
            port: DEFAULT_TLS_PORT,
            tls: Some(TlsOptions::default()),
            ..Self::default()
        }
    }

    /// Defaults with environment overrides applied
    ///
    /// - `KINETIC_CONNECT_TIMEOUT`: seconds (float)
    /// - `KINETIC_SOCKET_TIMEOUT`: seconds (float)
    /// - `KINETIC_CHUNK_SIZE`: bytes
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = env_seconds("KINETIC_CONNECT_TIMEOUT") {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = env_seconds("KINETIC_SOCKET_TIMEOUT") {
            config.socket_timeout = Some(timeout);
        }
        if let Some(size) = std::env::var("KINETIC_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.chunk_size = size;
        }
        config
    }

    /// "host:port" of the device
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KineticError::Config("chunk_size must be positive".into()));
        }
        if self.max_outstanding == 0 || self.queue_capacity == 0 || self.pipeline_depth == 0 {
            return Err(KineticError::Config(
                "pipelining depths must be positive".into(),
            ));
        }
        if self.range_page_size == 0 || self.range_prefetch == 0 {
            return Err(KineticError::Config(
                "range page size and prefetch must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_seconds(name: &str) -> Option<Duration> {
    let value = std::env::var(name).ok()?;
    match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            tracing::warn!("Ignoring invalid {}={}", name, value);
            None
        }
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set host and port from a socket address
    pub fn address(mut self, addr: std::net::SocketAddr) -> Self {
        self.config.hostname = addr.ip().to_string();
        self.config.port = addr.port();
        self
    }

    pub fn identity(mut self, identity: i64) -> Self {
        self.config.identity = identity;
        self
    }

    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.config.secret = secret.into();
        self
    }

    /// Pin the expected cluster version
    pub fn cluster_version(mut self, version: i64) -> Self {
        self.config.cluster_version = Some(version);
        self
    }

    pub fn pin(mut self, pin: impl Into<Vec<u8>>) -> Self {
        self.config.pin = Some(pin.into());
        self
    }

    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.config.tls = Some(options);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn value_transfer(mut self, mode: TransferMode) -> Self {
        self.config.value_transfer = mode;
        self
    }

    pub fn max_outstanding(mut self, count: usize) -> Self {
        self.config.max_outstanding = count;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.config.pipeline_depth = depth;
        self
    }

    pub fn range_page_size(mut self, size: u32) -> Self {
        self.config.range_page_size = size;
        self
    }

    pub fn range_prefetch(mut self, depth: usize) -> Self {
        self.config.range_prefetch = depth;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

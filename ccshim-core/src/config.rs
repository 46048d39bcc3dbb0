//! Shim configuration.
//!
//! All connection parameters are resolved by the embedding application
//! and passed in here; the shim performs no settings lookup of its own.

use crate::error::ShimError;
use std::path::PathBuf;
use std::time::Duration;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// TLS material for the peer connection. All files are PEM-encoded.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate(s) the peer is verified against; falls back to
    /// the system trust roots when unset.
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate presented for mutual TLS.
    pub client_cert_path: Option<PathBuf>,
    /// Private key matching the client certificate.
    pub client_key_path: Option<PathBuf>,
    /// SNI name, when it differs from the peer host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection parameters for a shim process.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// Peer address in `host:port` form, no scheme.
    pub peer_address: String,
    /// Chaincode identity announced in the Register message.
    pub chaincode_name: String,
    /// How long to wait for the TCP connect.
    pub connect_timeout: Duration,
    /// Buffer size for stream reads, clamped to sane bounds.
    pub read_buffer_size: usize,
    /// TLS material; plain TCP when unset.
    pub tls: Option<TlsConfig>,
}

impl ShimConfig {
    pub fn new(peer_address: impl Into<String>, chaincode_name: impl Into<String>) -> Self {
        Self {
            peer_address: peer_address.into(),
            chaincode_name: chaincode_name.into(),
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tls: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Splits the peer address into host and port.
    ///
    /// The address must be bare `host:port`; scheme prefixes are
    /// rejected.
    pub fn parse_peer_address(&self) -> Result<(String, u16), ShimError> {
        if self.peer_address.contains("://") {
            return Err(ShimError::InvalidArgument(
                "peer address should not contain any protocol information".to_string(),
            ));
        }

        let (host, port) = self.peer_address.rsplit_once(':').ok_or_else(|| {
            ShimError::InvalidArgument(
                "please provide the peer address in the format of host:port".to_string(),
            )
        })?;

        if host.is_empty() {
            return Err(ShimError::InvalidArgument(
                "peer address is missing a host".to_string(),
            ));
        }

        let port = port.parse::<u16>().map_err(|_| {
            ShimError::InvalidArgument(format!("invalid peer port: {}", port))
        })?;

        Ok((host.to_string(), port))
    }
}

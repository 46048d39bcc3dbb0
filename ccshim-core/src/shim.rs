//! Shim entry point: connect, register, chat.

use crate::chaincode::Chaincode;
use crate::config::ShimConfig;
use crate::error::ShimError;
use crate::handler::Handler;
use crate::stream::PeerStream;
use crate::tls;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Connects to the configured peer, registers the chaincode and runs
/// the message loop until the connection ends.
pub async fn start(config: ShimConfig, chaincode: Arc<dyn Chaincode>) -> Result<(), ShimError> {
    let stream = connect(&config).await?;
    tracing::info!(
        "connected to peer {} (tls: {}), registering as {}",
        config.peer_address,
        stream.is_tls(),
        config.chaincode_name
    );

    let handler = Handler::new(stream, chaincode, config.read_buffer_size);
    let register = Handler::register_message(&config.chaincode_name)?;
    handler.chat(register).await
}

/// Opens the TCP connection, with the TLS handshake on top when
/// configured.
pub async fn connect(config: &ShimConfig) -> Result<PeerStream, ShimError> {
    let (host, port) = config.parse_peer_address()?;

    let tcp = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect((host.as_str(), port)),
    )
    .await
    .map_err(|_| {
        ShimError::Io(std::io::Error::new(
            ErrorKind::TimedOut,
            format!("connecting to {}:{} timed out", host, port),
        ))
    })??;
    tcp.set_nodelay(true)?;

    match &config.tls {
        Some(tls_config) => {
            let (connector, server_name) = tls::build_connector(tls_config, &host)?;
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ShimError::TlsHandshake(e.to_string()))?;
            Ok(PeerStream::Tls { stream })
        }
        None => Ok(PeerStream::Plain { stream: tcp }),
    }
}

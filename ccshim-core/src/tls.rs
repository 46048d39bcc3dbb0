//! TLS connector construction from shim configuration.

use crate::config::TlsConfig;
use crate::error::ShimError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Builds a TLS connector and SNI name for the peer connection.
///
/// Uses the configured CA roots (or system roots), and presents a
/// client certificate when mTLS material is configured.
pub fn build_connector(
    config: &TlsConfig,
    peer_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ShimError> {
    let mut roots = RootCertStore::empty();
    if let Some(ref ca_path) = config.ca_cert_path {
        for cert in read_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| ShimError::TlsConfig(format!("invalid CA cert: {}", e)))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let client_config = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = read_certs(cert_path)?;
            let key = read_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ShimError::TlsConfig(format!("invalid client cert/key: {}", e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ShimError::TlsConfig(
                "client certificate and key must be configured together".to_string(),
            ))
        }
    };

    let server_name_str = config.server_name.as_deref().unwrap_or(peer_host);
    let server_name = ServerName::try_from(server_name_str.to_string())
        .map_err(|_| ShimError::TlsConfig(format!("invalid server name: {}", server_name_str)))?;

    Ok((TlsConnector::from(Arc::new(client_config)), server_name))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ShimError> {
    let file = File::open(path)
        .map_err(|e| ShimError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ShimError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ShimError> {
    let file = File::open(path)
        .map_err(|e| ShimError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| ShimError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => {
                return Err(ShimError::TlsConfig(format!(
                    "no private key found in {:?}",
                    path
                )))
            }
            _ => continue,
        }
    }
}

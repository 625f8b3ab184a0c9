//! Broker TLS configuration.
//!
//! TLS 1.3 with ALPN `keyward/1`. Certificates come from PEM files, or are
//! generated self-signed for `localhost` when none are configured. Clients
//! must pin the self-signed certificate or skip verification, so it is only
//! suitable for development and tests.

use std::sync::Arc;

use keyward_proto::ALPN_PROTOCOL;
use quinn::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::BrokerError;

/// QUIC server configuration plus the leaf certificate it presents.
pub(crate) struct TlsSetup {
    pub(crate) server_config: ServerConfig,
    pub(crate) certificate: CertificateDer<'static>,
}

/// Load the certificate chain and key from PEM files.
pub(crate) fn load(cert_path: &str, key_path: &str) -> Result<TlsSetup, BrokerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| BrokerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| BrokerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BrokerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| BrokerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| BrokerError::Config("no private key found".to_string()))?;

    build(certs, key)
}

/// Generate a self-signed certificate for `localhost`.
pub(crate) fn self_signed() -> Result<TlsSetup, BrokerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| BrokerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    build(vec![cert.cert.der().clone()], key.into())
}

fn build(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsSetup, BrokerError> {
    let certificate = certs
        .first()
        .cloned()
        .ok_or_else(|| BrokerError::Config("certificate file holds no certificate".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| BrokerError::Config(format!("invalid TLS config: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BrokerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| BrokerError::Config(format!("QUIC config error: {e}")))?,
    ));

    Ok(TlsSetup { server_config, certificate })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_setup_builds() {
        let setup = self_signed().unwrap();
        assert!(!setup.certificate.is_empty());
    }

    #[test]
    fn missing_files_are_config_errors() {
        let err = load("/nonexistent/cert.pem", "/nonexistent/key.pem").err().unwrap();
        assert!(matches!(err, BrokerError::Config(_)));
    }
}

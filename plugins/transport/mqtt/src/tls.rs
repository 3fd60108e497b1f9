//! TLS client configuration for the broker connection.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use tape_api::{LinkError, SslConfig};

/// Build a TLS 1.3 client config from `ssl`.
///
/// Client certificate and key are used only when both are given.
pub fn client_config(ssl: &SslConfig) -> Result<ClientConfig, LinkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| LinkError::config(format!("TLS protocol setup: {e}")))?;

    let builder = if ssl.insecure {
        tracing::warn!("TLS certificate and hostname verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoServerVerification::new(&provider)))
    } else {
        let ca_cert = ssl.ca_cert.as_deref().ok_or_else(|| {
            LinkError::config("TLS enabled but no CA certificate given (set ca_cert or insecure)")
        })?;
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_cert)? {
            roots
                .add(cert)
                .map_err(|e| LinkError::config(format!("CA certificate {}: {e}", ca_cert.display())))?;
        }
        builder.with_root_certificates(roots)
    };

    match (&ssl.certfile, &ssl.keyfile) {
        (Some(certfile), Some(keyfile)) => {
            let certs = load_certs(certfile)?;
            let key = load_private_key(keyfile)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| LinkError::config(format!("client certificate: {e}")))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, LinkError> {
    let file = File::open(path)
        .map_err(|e| LinkError::config(format!("open certificate file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LinkError::config(format!("parse certificates from {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(LinkError::config(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, LinkError> {
    let file = File::open(path)
        .map_err(|e| LinkError::config(format!("open key file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| LinkError::config(format!("parse private key from {}: {e}", path.display())))?
        .ok_or_else(|| LinkError::config(format!("no private key found in {}", path.display())))
}

// ═══════════════════════════════════════════════════════════════
//  Insecure verifier
// ═══════════════════════════════════════════════════════════════

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct NoServerVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl NoServerVerification {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tape_api::ErrorKind;
    use tempfile::NamedTempFile;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn insecure_mode_needs_no_ca() {
        let ssl = SslConfig {
            enable: true,
            insecure: true,
            ..SslConfig::default()
        };
        assert!(client_config(&ssl).is_ok());
    }

    #[test]
    fn verified_mode_requires_ca() {
        let ssl = SslConfig {
            enable: true,
            ..SslConfig::default()
        };
        let err = client_config(&ssl).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_ca_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let ssl = SslConfig {
            enable: true,
            ca_cert: Some(dir.path().join("ca.pem")),
            ..SslConfig::default()
        };
        let err = client_config(&ssl).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("ca.pem"));
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let file = pem_file("# nothing here\n");
        let err = load_certs(file.path()).unwrap_err();
        assert!(err.message().contains("no certificates"));
    }

    #[test]
    fn pem_without_key_is_rejected() {
        let file = pem_file("");
        let err = load_private_key(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("no private key"));
    }

    #[test]
    fn insecure_verifier_offers_provider_schemes() {
        let provider = rustls::crypto::ring::default_provider();
        let verifier = NoServerVerification::new(&provider);
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}

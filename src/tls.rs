use crate::error::{Result, SyncError};
use crate::protocol::ALPN;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

// Name placed in generated self-signed certificates
const SELF_SIGNED_NAME: &str = "quicsyncd.local";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Load the server certificate from PEM files, or generate an in-memory
/// self-signed one when neither path is given.
pub fn load_or_generate_server_config(
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<rustls::ServerConfig> {
    let (certs, key) = match (cert, key) {
        (Some(c), Some(k)) => load_pem_pair(&c, &k)?,
        (None, None) => generate_self_signed()?,
        _ => return Err(SyncError::Config("--tls-cert requires --tls-key".into())),
    };

    let mut cfg = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    cfg.alpn_protocols = vec![ALPN.to_vec()];
    Ok(cfg)
}

fn load_pem_pair(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = {
        let mut rd = BufReader::new(fs::File::open(cert_path).map_err(|e| SyncError::io(cert_path, e))?);
        let mut out = Vec::new();
        for c in rustls_pemfile::certs(&mut rd) {
            out.push(c.map_err(|e| SyncError::io(cert_path, e))?);
        }
        out
    };
    if certs.is_empty() {
        return Err(SyncError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut rd = BufReader::new(fs::File::open(key_path).map_err(|e| SyncError::io(key_path, e))?);
    let key = rustls_pemfile::private_key(&mut rd)
        .map_err(|e| SyncError::io(key_path, e))?
        .ok_or_else(|| SyncError::Tls(format!("no private key found in {}", key_path.display())))?;

    Ok((certs, key))
}

fn generate_self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec![SELF_SIGNED_NAME.to_string()])
        .map_err(|e| SyncError::Tls(format!("generate self-signed cert: {}", e)))?;
    let der = cert
        .serialize_der()
        .map_err(|e| SyncError::Tls(format!("serialize cert: {}", e)))?;
    let key = PrivatePkcs8KeyDer::from(cert.serialize_private_key_der());
    Ok((vec![CertificateDer::from(der)], PrivateKeyDer::Pkcs8(key)))
}

/// Accepts any server certificate. The channel is encrypted but the peer's
/// identity is not verified; handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub fn build_client_config() -> Result<rustls::ClientConfig> {
    let provider = provider();
    let verifier = AcceptAnyServerCert {
        provider: provider.clone(),
    };
    let mut cfg = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    cfg.alpn_protocols = vec![ALPN.to_vec()];
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_server_config() {
        let cfg = load_or_generate_server_config(None, None).unwrap();
        assert_eq!(cfg.alpn_protocols, vec![ALPN.to_vec()]);
    }

    #[test]
    fn test_lone_cert_is_config_error() {
        let err = load_or_generate_server_config(Some(PathBuf::from("cert.pem")), None).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_pem_pair_from_disk() {
        let dir = TempDir::new().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        assert!(load_or_generate_server_config(Some(cert_path), Some(key_path)).is_ok());
    }

    #[test]
    fn test_client_config_has_alpn() {
        let cfg = build_client_config().unwrap();
        assert_eq!(cfg.alpn_protocols, vec![ALPN.to_vec()]);
    }
}

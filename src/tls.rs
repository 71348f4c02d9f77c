//! TLS client configuration: system roots plus an optional CA bundle, or no verification.

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ClientConfig;
use rustls::pki_types::CertificateDer;
use rustls::SignatureScheme;
use rustls_pemfile::certs;
use rustls_pki_types::ServerName;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Verifier that accepts any server certificate. Only for use with tls skip_verify.
#[derive(Debug)]
struct InsecureServerVerifier;

impl ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// Build the client config used for ldaps:// and StartTLS.
pub fn client_config(ca_pem: Option<&[u8]>, skip_verify: bool) -> Result<Arc<ClientConfig>> {
    if skip_verify {
        return tls_client_config_insecure();
    }
    tls_client_config_with_ca(ca_pem)
}

fn load_root_store(extra_ca_pem: Option<&[u8]>) -> Result<rustls::RootCertStore> {
    let mut root_store = rustls::RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(native) => {
            for cert in native {
                let _ = root_store.add(cert);
            }
        }
        // a CA bundle alone is enough to verify
        Err(e) if extra_ca_pem.is_some() => debug!("Ignoring system CA load failure: {}", e),
        Err(e) => return Err(e).context("Load system CA certs"),
    }
    if let Some(pem) = extra_ca_pem {
        let parsed = parse_certificates(pem)?;
        if parsed.is_empty() {
            anyhow::bail!("No certificates in CA PEM data");
        }
        for cert in parsed {
            root_store.add(cert).context("Add CA certificate")?;
        }
    }
    Ok(root_store)
}

fn tls_client_config_insecure() -> Result<Arc<ClientConfig>> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    config.dangerous().set_certificate_verifier(Arc::new(InsecureServerVerifier));
    Ok(Arc::new(config))
}

fn tls_client_config_with_ca(extra_ca_pem: Option<&[u8]>) -> Result<Arc<ClientConfig>> {
    let root_store = load_root_store(extra_ca_pem)?;
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    certs(&mut std::io::Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .context("Parse CA PEM")
}

/// Read a PEM CA bundle from disk, checking it holds at least one certificate.
pub fn load_ca_file(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path).with_context(|| format!("Open CA file: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let found: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Parse PEM certificates")?;
    if found.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }
    fs::read(path).with_context(|| format!("Read CA file: {}", path.display()))
}

/// SNI name for `host`; IP literals are accepted as-is.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| anyhow::anyhow!("Invalid hostname for TLS SNI: {}", host))
}

//! rustls connectors for the `sslmode` values that need TLS.
//!
//! `require` encrypts but accepts any certificate, `verify-ca` checks the chain against the
//! trust roots without looking at the hostname, and `verify-full` checks both. Handshake
//! signatures are always verified.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::config::SslMode;
use crate::error::TxMiddlewareError;

/// How a [`PgManager`](super::PgManager) opens its sockets.
#[derive(Clone)]
pub enum PgConnector {
    Plain,
    Tls(MakeRustlsConnect),
}

impl PgConnector {
    /// Connector for `mode`. Trust roots come from `root_cert` (PEM) when given, otherwise
    /// from the platform store.
    ///
    /// # Errors
    /// `ConfigError` if a verifying mode has no usable trust roots or the TLS config
    /// cannot be built; `Io` if `root_cert` cannot be read.
    pub fn for_mode(mode: SslMode, root_cert: Option<&Path>) -> Result<Self, TxMiddlewareError> {
        if !mode.requires_tls() {
            return Ok(Self::Plain);
        }
        let config = client_config(mode, root_cert)?;
        Ok(Self::Tls(MakeRustlsConnect::new(config)))
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl std::fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_tls() { "Tls" } else { "Plain" })
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub(crate) fn client_config(
    mode: SslMode,
    root_cert: Option<&Path>,
) -> Result<ClientConfig, TxMiddlewareError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| TxMiddlewareError::ConfigError(format!("tls: {e}")))?;

    let config = match mode {
        SslMode::Disable => {
            return Err(TxMiddlewareError::ConfigError(
                "tls: sslmode disable has no client config".to_string(),
            ));
        }
        SslMode::Require => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ChainVerifier::any_certificate(
                &provider,
            )))
            .with_no_client_auth(),
        SslMode::VerifyCa => {
            let roots = load_roots(root_cert)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainVerifier::trusting(
                    roots, &provider,
                )))
                .with_no_client_auth()
        }
        SslMode::VerifyFull => builder
            .with_root_certificates(load_roots(root_cert)?)
            .with_no_client_auth(),
    };
    Ok(config)
}

fn load_roots(root_cert: Option<&Path>) -> Result<RootCertStore, TxMiddlewareError> {
    let mut store = RootCertStore::empty();
    match root_cert {
        Some(path) => {
            let mut reader = BufReader::new(File::open(path)?);
            for cert in rustls_pemfile::certs(&mut reader) {
                store.add(cert?).map_err(|e| {
                    TxMiddlewareError::ConfigError(format!(
                        "tls: bad certificate in {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for err in &native.errors {
                tracing::warn!(error = %err, "skipping unreadable system certificate");
            }
            let (added, ignored) = store.add_parsable_certificates(native.certs);
            tracing::debug!(added, ignored, "loaded system trust roots");
        }
    }
    if store.is_empty() {
        return Err(TxMiddlewareError::ConfigError(match root_cert {
            Some(path) => format!("tls: no certificates in {}", path.display()),
            None => "tls: no system trust roots found".to_string(),
        }));
    }
    Ok(store)
}

/// Server verifier that ignores the hostname. With no roots it accepts every certificate.
#[derive(Debug)]
struct ChainVerifier {
    roots: Option<Arc<RootCertStore>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ChainVerifier {
    fn any_certificate(provider: &CryptoProvider) -> Self {
        Self {
            roots: None,
            algorithms: provider.signature_verification_algorithms,
        }
    }

    fn trusting(roots: RootCertStore, provider: &CryptoProvider) -> Self {
        Self {
            roots: Some(Arc::new(roots)),
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for ChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(roots) = &self.roots {
            let cert = ParsedCertificate::try_from(end_entity)?;
            verify_server_cert_signed_by_trust_anchor(
                &cert,
                roots,
                intermediates,
                now,
                self.algorithms.all,
            )?;
        }
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
    use std::io::Write;

    use super::*;

    fn junk_cert() -> CertificateDer<'static> {
        CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01])
    }

    fn server_name() -> ServerName<'static> {
        ServerName::try_from("db.example.org").unwrap()
    }

    #[test]
    fn disable_connects_in_plaintext() {
        let connector = PgConnector::for_mode(SslMode::Disable, None).unwrap();
        assert!(!connector.is_tls());
        assert!(client_config(SslMode::Disable, None).is_err());
    }

    #[test]
    fn require_uses_tls_and_accepts_any_certificate() {
        let connector = PgConnector::for_mode(SslMode::Require, None).unwrap();
        assert!(connector.is_tls());

        let verifier = ChainVerifier::any_certificate(&provider());
        assert!(
            verifier
                .verify_server_cert(&junk_cert(), &[], &server_name(), &[], UnixTime::now())
                .is_ok()
        );
    }

    #[test]
    fn verify_ca_rejects_certificates_outside_the_roots() {
        let verifier = ChainVerifier::trusting(RootCertStore::empty(), &provider());
        assert!(
            verifier
                .verify_server_cert(&junk_cert(), &[], &server_name(), &[], UnixTime::now())
                .is_err()
        );
    }

    #[test]
    fn verifying_modes_need_a_readable_root_file() {
        let missing = Path::new("/nonexistent/root.crt");
        for mode in [SslMode::VerifyCa, SslMode::VerifyFull] {
            assert!(matches!(
                PgConnector::for_mode(mode, Some(missing)),
                Err(TxMiddlewareError::Io(_))
            ));
        }
    }

    #[test]
    fn verifying_modes_reject_an_empty_root_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        for mode in [SslMode::VerifyCa, SslMode::VerifyFull] {
            assert!(matches!(
                PgConnector::for_mode(mode, Some(file.path())),
                Err(TxMiddlewareError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn require_ignores_the_root_file() {
        let missing = Path::new("/nonexistent/root.crt");
        assert!(
            PgConnector::for_mode(SslMode::Require, Some(missing))
                .unwrap()
                .is_tls()
        );
    }
}

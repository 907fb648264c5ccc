//! rustls-based TLS connector.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as RustlsConnector;

use crate::error::TlsError;

/// TLS settings for a SQL Server connection.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip certificate validation entirely. Development only: this exposes
    /// the connection to man-in-the-middle attacks.
    pub trust_server_certificate: bool,
    /// Extra trust anchors; the Mozilla root store is used when empty.
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Override the name used for SNI and certificate validation.
    pub server_name: Option<String>,
}

/// Accepts any server certificate. Behind `trust_server_certificate` only.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// TLS connector for SQL Server transports.
pub struct TlsConnector {
    options: TlsOptions,
    inner: RustlsConnector,
}

impl TlsConnector {
    /// Build a connector from the given options.
    pub fn new(options: TlsOptions) -> Result<Self, TlsError> {
        let client_config = Self::client_config(&options)?;
        Ok(Self {
            options,
            inner: RustlsConnector::from(Arc::new(client_config)),
        })
    }

    fn client_config(options: &TlsOptions) -> Result<ClientConfig, TlsError> {
        if options.trust_server_certificate {
            tracing::warn!(
                "TrustServerCertificate is enabled; certificate validation is DISABLED"
            );
            return Ok(ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth());
        }

        let mut roots = RootCertStore::empty();
        if options.root_certificates.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in &options.root_certificates {
                roots
                    .add(cert.clone())
                    .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
            }
        }

        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// Run the TLS handshake over `stream`.
    pub async fn connect<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self
            .options
            .server_name
            .as_deref()
            .unwrap_or(server_name)
            .to_owned();
        let dns_name = ServerName::try_from(server_name.clone())
            .map_err(|_| TlsError::InvalidServerName(server_name.clone()))?;

        tracing::debug!(server_name = %server_name, "starting TLS handshake");
        let stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;
        tracing::debug!("TLS handshake complete");

        Ok(stream)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[test]
    fn default_options_build() {
        install_provider();
        assert!(TlsConnector::new(TlsOptions::default()).is_ok());
    }

    #[test]
    fn trust_override_builds() {
        install_provider();
        let options = TlsOptions {
            trust_server_certificate: true,
            ..TlsOptions::default()
        };
        assert!(TlsConnector::new(options).is_ok());
    }
}

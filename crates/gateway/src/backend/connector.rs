//! TCP and TLS transport to the backend.

use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{BoxedIo, Connector, ExchangeError};
use crate::config::BackendConfig;

/// Connects to the backend over TCP, optionally wrapped in TLS.
pub struct TcpConnector {
    address: String,
    tls: Option<TlsSettings>,
}

struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TcpConnector {
    /// Plain TCP, no TLS.
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: None,
        }
    }

    /// Build a connector from configuration, loading trust roots as needed.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let address = config.address();
        if !config.tls {
            tracing::warn!(%address, "Backend TLS disabled; traffic to the backend is unencrypted");
            return Ok(Self::plain(address));
        }

        let client_config = client_config(config)?;
        let server_name = ServerName::try_from(config.host.clone())
            .with_context(|| format!("Invalid backend host name: {}", config.host))?;

        Ok(Self {
            address,
            tls: Some(TlsSettings {
                connector: TlsConnector::from(Arc::new(client_config)),
                server_name,
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<BoxedIo, ExchangeError>> + Send + '_>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| ExchangeError::Connection(format!("{}: {}", self.address, e)))?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "Could not disable Nagle on backend socket");
            }

            let Some(tls) = &self.tls else {
                return Ok(Box::new(stream) as BoxedIo);
            };

            let stream = tls
                .connector
                .connect(tls.server_name.clone(), stream)
                .await
                .map_err(|e| {
                    ExchangeError::Connection(format!("TLS handshake with {}: {}", self.address, e))
                })?;
            Ok(Box::new(stream) as BoxedIo)
        })
    }
}

fn client_config(config: &BackendConfig) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .context("TLS provider offers no usable protocol versions")?;

    if config.insecure_skip_verify {
        tracing::warn!("Backend certificate verification is disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    if let Some(ca_file) = &config.ca_file {
        let added = add_pem_roots(&mut roots, ca_file)?;
        tracing::debug!(path = %ca_file.display(), added, "Loaded backend CA certificates");
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

fn add_pem_roots(roots: &mut RootCertStore, path: &Path) -> Result<usize> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CA file: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.with_context(|| format!("Failed to parse CA file: {}", path.display()))?;
        roots
            .add(cert)
            .with_context(|| format!("Rejected CA certificate in {}", path.display()))?;
        added += 1;
    }

    if added == 0 {
        anyhow::bail!("No certificates found in CA file: {}", path.display());
    }
    Ok(added)
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

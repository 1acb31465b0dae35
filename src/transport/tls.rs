//! TLS transport implementation
//!
//! Provides TLS-wrapped hop connections using rustls (pure Rust, easy static
//! linking). The handshake runs either over a freshly dialed TCP socket or over
//! a stream already tunneled through earlier hops.

use super::{BoxedStream, Connector, HopStream, SocketOpts, TcpConnector};
use crate::config::TlsConfig;
use crate::error::ConnectError;
use crate::helper::with_timeout;
use crate::socks::TargetAddr;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// TLS connector for encrypted hops
#[derive(Clone)]
pub struct TlsConnector {
    /// rustls connector
    connector: tokio_rustls::TlsConnector,
    /// Server hostname for verification
    hostname: Option<String>,
    /// Dialer for the underlying socket
    tcp: TcpConnector,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("hostname", &self.hostname)
            .field("tcp", &self.tcp)
            .finish()
    }
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration
    pub fn with_config(config: &TlsConfig, socket_opts: SocketOpts) -> Result<Self> {
        let tls_config = if config.skip_verify {
            // Accepts any certificate; only meant for testing
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            ClientConfig::builder()
                .with_root_certificates(load_roots(config.trusted_root.as_deref())?)
                .with_no_client_auth()
        };

        Ok(TlsConnector {
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            hostname: config.hostname.clone(),
            tcp: TcpConnector::with_defaults().with_socket_opts(socket_opts),
        })
    }

    fn server_name(&self, addr: &TargetAddr) -> Result<ServerName<'static>, ConnectError> {
        let hostname = self.hostname.clone().unwrap_or_else(|| addr.host());
        ServerName::try_from(hostname.clone())
            .map_err(|e| ConnectError::chain(format!("Invalid TLS hostname {}: {}", hostname, e)))
    }
}

fn load_roots(trusted_root: Option<&str>) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    // Add system root certificates
    let native_certs = rustls_native_certs::load_native_certs();
    for cert in native_certs.certs {
        root_store.add(cert).ok();
    }

    // Add custom trusted root if specified
    if let Some(root_path) = trusted_root {
        let file = std::fs::File::open(root_path)
            .with_context(|| format!("Failed to open certificate file: {}", root_path))?;
        let mut reader = BufReader::new(file);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse certificates from: {}", root_path))?;
        for cert in certs {
            root_store
                .add(cert)
                .with_context(|| "Failed to add certificate to store")?;
        }
    }

    Ok(root_store)
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(
        &self,
        addr: &TargetAddr,
        timeout: Option<Duration>,
    ) -> Result<HopStream, ConnectError> {
        // One deadline covers the dial and the handshake
        let connect = async {
            let tcp = self.tcp.connect(addr, None).await?;
            self.wrap(tcp, addr).await
        };

        with_timeout(timeout, connect)
            .await
            .map_err(|_| ConnectError::timed_out(format!("TLS connect to {}", addr)))?
    }

    async fn wrap(&self, stream: HopStream, addr: &TargetAddr) -> Result<HopStream, ConnectError> {
        let server_name = self.server_name(addr)?;
        let HopStream {
            stream,
            local_addr,
            peer_addr,
        } = stream;

        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ConnectError::from_io(&e, format!("TLS handshake with {}", addr)))?;

        tracing::debug!("TLS session established with {}", addr);

        Ok(HopStream {
            stream: Box::new(tls_stream) as BoxedStream,
            local_addr,
            peer_addr,
        })
    }
}

/// Certificate verifier that accepts all certificates (dangerous!)
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
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

//! TLS upgrade
//!
//! Devices present self-signed certificates. Without a CA bundle the
//! certificate chain is accepted as presented, but handshake signatures are
//! still verified against it.

use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::TlsOptions;
use crate::error::{KineticError, Result};

/// Blocking TLS stream over TCP
pub type TlsStream = rustls::StreamOwned<ClientConnection, TcpStream>;

/// Wrap `tcp` in TLS and complete the handshake
pub fn upgrade(tcp: TcpStream, options: &TlsOptions, hostname: &str) -> Result<TlsStream> {
    let config = client_config(options)?;
    let server_name = options.server_name.as_deref().unwrap_or(hostname);
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| KineticError::Tls(format!("invalid server name {}: {}", server_name, e)))?;

    let connection = ClientConnection::new(Arc::new(config), name).map_err(tls_error)?;
    let mut stream = rustls::StreamOwned::new(connection, tcp);
    while stream.conn.is_handshaking() {
        stream.conn.complete_io(&mut stream.sock)?;
    }
    tracing::debug!(
        "TLS established with {} ({:?})",
        server_name,
        stream.conn.protocol_version()
    );
    Ok(stream)
}

fn client_config(options: &TlsOptions) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?;

    let config = match &options.ca_file {
        Some(path) => {
            let mut reader = BufReader::new(File::open(path)?);
            let mut roots = RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?).map_err(tls_error)?;
            }
            if roots.is_empty() {
                return Err(KineticError::Tls(format!(
                    "no certificates in {}",
                    path.display()
                )));
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptDeviceCertificate { provider }))
            .with_no_client_auth(),
    };
    Ok(config)
}

fn tls_error(err: rustls::Error) -> KineticError {
    KineticError::Tls(err.to_string())
}

/// Accepts any device certificate, checks handshake signatures
#[derive(Debug)]
struct AcceptDeviceCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptDeviceCertificate {
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
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

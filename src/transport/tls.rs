//! In-band TLS upgrade for an established lobby session.
//!
//! The lobby protocol upgrades an existing plain-text connection: the client
//! sends `STARTTLS`, the server acknowledges with an `OK` carrying
//! `cmd=STARTTLS` in its payload, and from the next byte on the socket
//! speaks TLS. The handshake is driven incrementally: each receive cycle
//! polls the connect future with a small time budget until it resolves.
//!
//! Certificate verification is recorded, not enforced: lobby servers
//! commonly run self-signed certificates, so the session always completes
//! the handshake and exposes the peer fingerprint plus whether the
//! certificate chained to a native root for the embedding program to judge.

use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::dispatch::TlsCallback;

/// Facts about an established TLS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsDetails {
    /// SHA-256 of the peer's end-entity certificate, colon-separated
    /// uppercase hex.
    pub fingerprint_sha256: String,
    /// Whether the certificate verified against the native root store for
    /// the configured hostname.
    pub hostname_verified: bool,
}

/// Where the session stands with respect to the TLS upgrade.
pub(crate) enum TlsPhase {
    /// No upgrade requested; traffic is plain text.
    PlainText,
    /// `STARTTLS` sent, waiting for the server acknowledgement.
    Requested { callback: Option<TlsCallback> },
    /// Acknowledged; the connect future is being polled across cycles.
    Handshaking(HandshakeInFlight),
    /// The TLS layer carries the session.
    Established(TlsDetails),
}

impl TlsPhase {
    /// Short label for error messages.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::PlainText => "plain text",
            Self::Requested { .. } => "requested",
            Self::Handshaking(_) => "in progress",
            Self::Established(_) => "established",
        }
    }
}

/// A TLS handshake being driven to completion.
pub(crate) struct HandshakeInFlight {
    pub(crate) fut: Pin<Box<tokio_rustls::Connect<TcpStream>>>,
    pub(crate) callback: Option<TlsCallback>,
    verified: Arc<Mutex<Option<bool>>>,
}

impl HandshakeInFlight {
    /// What the verifier recorded, once the handshake has completed.
    /// `false` when verification failed or never ran.
    pub(crate) fn hostname_verified(&self) -> bool {
        self.verified.lock().unwrap_or(false)
    }
}

/// Build the connect future for an upgrade on `tcp`, verifying (but not
/// enforcing) the certificate against the native root store.
pub(crate) fn start_handshake(
    hostname: &str,
    tcp: TcpStream,
    callback: Option<TlsCallback>,
) -> std::io::Result<HandshakeInFlight> {
    let verified = Arc::new(Mutex::new(None));
    let verifier = RecordingVerifier::new(Arc::clone(&verified));

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    Ok(HandshakeInFlight {
        fut: Box::pin(connector.connect(server_name, tcp)),
        callback,
        verified,
    })
}

/// SHA-256 fingerprint of the peer's end-entity certificate.
pub(crate) fn peer_fingerprint(stream: &TlsStream<TcpStream>) -> Option<String> {
    let (_, conn) = stream.get_ref();
    let cert = conn.peer_certificates()?.first()?;
    let digest = Sha256::digest(cert.as_ref());
    Some(
        digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Certificate verifier that runs the normal WebPKI checks but records the
/// outcome instead of failing the handshake.
#[derive(Debug)]
struct RecordingVerifier {
    /// Real verifier when native roots could be loaded.
    inner: Option<Arc<WebPkiServerVerifier>>,
    outcome: Arc<Mutex<Option<bool>>>,
}

impl RecordingVerifier {
    fn new(outcome: Arc<Mutex<Option<bool>>>) -> Self {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            if let Err(e) = roots.add(cert) {
                warn!(error = %e, "failed to add root cert");
            }
        }
        for e in &native.errors {
            warn!(error = %e, "error loading native certs");
        }

        let inner = if roots.is_empty() {
            None
        } else {
            match WebPkiServerVerifier::builder(Arc::new(roots)).build() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "cannot build webpki verifier");
                    None
                }
            }
        };

        Self { inner, outcome }
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let verified = match &self.inner {
            Some(v) => v
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .is_ok(),
            None => false,
        };
        *self.outcome.lock() = Some(verified);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        match &self.inner {
            Some(v) => v.verify_tls12_signature(message, cert, dss),
            None => tokio_rustls::rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &provider()?.signature_verification_algorithms,
            ),
        }
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        match &self.inner {
            Some(v) => v.verify_tls13_signature(message, cert, dss),
            None => tokio_rustls::rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &provider()?.signature_verification_algorithms,
            ),
        }
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        match &self.inner {
            Some(v) => v.supported_verify_schemes(),
            None => provider()
                .map(|p| p.signature_verification_algorithms.supported_schemes())
                .unwrap_or_default(),
        }
    }
}

fn provider() -> Result<&'static Arc<CryptoProvider>, Error> {
    CryptoProvider::get_default()
        .ok_or_else(|| Error::General("no process-default crypto provider".to_string()))
}

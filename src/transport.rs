//! TLS Transport (§4.1): HTTPS client that enforces pin verification at
//! handshake time, attaches standard headers, and carries a cookie jar.
//!
//! Two flavors are built, never interchangeably: [`PinScope::Primary`] keeps
//! full hostname and CA-chain verification *and* requires a pinned SPKI;
//! [`PinScope::Alternative`] disables hostname verification (the alt host is
//! an opaque, server-chosen label) but still requires a pinned SPKI — the
//! pin stands in for identity. Enabling a proxy alongside pinning is refused
//! at construction, since pin verification through an intercepting proxy is
//! undefined here.

use std::sync::{Arc, Mutex};

use reqwest::cookie::Jar;
use reqwest::Client;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::error::{SessionError, SessionResult};
use crate::pins::PinSet;

/// Host and observed SPKI digests from a failed pin check, recorded by
/// [`PinningVerifier`] at handshake time so [`crate::request_engine`] can
/// build a genuine [`SessionError::TlsPinning`] instead of guessing from
/// whatever opaque error `reqwest` surfaces for the failed handshake.
#[derive(Debug, Clone)]
pub struct PinDiagnostic {
    pub host: String,
    pub observed: Vec<String>,
}

/// Which pin set (and identity model) a transport was built under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinScope {
    /// Canonical API host: hostname + CA chain + pin, all required.
    Primary,
    /// DoH-discovered alternative host: pin only.
    Alternative,
}

/// A pin-enforcing HTTPS client plus the standard headers every request carries.
pub struct Transport {
    pub client: Client,
    pub scope: PinScope,
    diagnostic: Arc<Mutex<Option<PinDiagnostic>>>,
}

impl Transport {
    /// Build a transport for `host`, enforcing `pins` at handshake time.
    ///
    /// `cookie_jar` is shared across every transport a given session builds
    /// (primary and alternative alike) so that cookies set by one request are
    /// visible to the next, even though a fresh [`Client`] is built per
    /// dispatch — the jar, not the client, is what spec §3 calls "per-session".
    ///
    /// Returns [`SessionError::MissingDependency`]-shaped construction errors
    /// never occur here; the one hard failure is requesting a proxy together
    /// with pinning, which is rejected outright per spec §4.1.
    pub fn build(
        scope: PinScope,
        pins: &'static PinSet,
        user_agent: &str,
        app_version: &str,
        proxy: Option<&str>,
        cookie_jar: Arc<Jar>,
    ) -> SessionResult<Self> {
        if proxy.is_some() {
            return Err(SessionError::Unknown(
                "cannot enable a proxy while TLS pinning is enabled".to_string(),
            ));
        }

        let diagnostic: Arc<Mutex<Option<PinDiagnostic>>> = Arc::new(Mutex::new(None));

        let verifier: Arc<dyn ServerCertVerifier> = match scope {
            PinScope::Primary => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                Arc::new(PinningVerifier::with_hostname_check(pins, roots, diagnostic.clone()))
            }
            PinScope::Alternative => Arc::new(PinningVerifier::pin_only(pins, diagnostic.clone())),
        };

        let tls_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-pm-apiversion", "3".parse().unwrap());
        headers.insert(
            "Accept",
            "application/vnd.protonmail.v1+json".parse().unwrap(),
        );
        headers.insert("x-pm-appversion", app_version.parse().map_err(|_| {
            SessionError::Unknown("invalid app version header value".to_string())
        })?);
        headers.insert("User-Agent", user_agent.parse().map_err(|_| {
            SessionError::Unknown("invalid user agent header value".to_string())
        })?);

        let client = Client::builder()
            .use_preconfigured_tls(tls_config)
            .default_headers(headers)
            .cookie_provider(cookie_jar)
            .build()
            .map_err(SessionError::from)?;

        Ok(Self { client, scope, diagnostic })
    }

    /// Take (and clear) the pin-mismatch diagnostic recorded during the last
    /// handshake attempt on this transport's client, if the failure was a
    /// pin mismatch rather than some other connection error.
    pub fn take_pin_diagnostic(&self) -> Option<PinDiagnostic> {
        self.diagnostic.lock().unwrap().take()
    }
}

/// Verifies the end-entity (and intermediate) certificates against a pin set.
///
/// When `roots` is set, hostname and CA-chain validation run first via a
/// standard `rustls` webpki verifier; the pin check always runs in addition.
struct PinningVerifier {
    pins: &'static PinSet,
    webpki: Option<Arc<dyn ServerCertVerifier>>,
    diagnostic: Arc<Mutex<Option<PinDiagnostic>>>,
}

impl PinningVerifier {
    fn with_hostname_check(
        pins: &'static PinSet,
        roots: RootCertStore,
        diagnostic: Arc<Mutex<Option<PinDiagnostic>>>,
    ) -> Self {
        let webpki = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .expect("static root store is well-formed");
        Self {
            pins,
            webpki: Some(webpki as Arc<dyn ServerCertVerifier>),
            diagnostic,
        }
    }

    fn pin_only(pins: &'static PinSet, diagnostic: Arc<Mutex<Option<PinDiagnostic>>>) -> Self {
        Self { pins, webpki: None, diagnostic }
    }

    fn check_pins(
        &self,
        host: &str,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<(), TlsError> {
        let candidates = std::iter::once(end_entity).chain(intermediates.iter());
        let mut observed = Vec::new();
        for cert in candidates {
            if let Ok(digest) = spki_sha256_base64(cert) {
                if self.pins.matches(&digest) {
                    return Ok(());
                }
                observed.push(digest);
            }
        }
        *self.diagnostic.lock().unwrap() = Some(PinDiagnostic {
            host: host.to_string(),
            observed,
        });
        Err(TlsError::General("TLS pin mismatch".to_string()))
    }
}

/// Render a `ServerName` the way a caller would type it, for diagnostics only.
fn server_name_to_string(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_string(),
        ServerName::IpAddress(ip) => format!("{ip:?}"),
        other => format!("{other:?}"),
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        if let Some(webpki) = &self.webpki {
            webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }
        self.check_pins(&server_name_to_string(server_name), end_entity, intermediates)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &CryptoProvider::get_default()
                .expect("default crypto provider installed")
                .signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &CryptoProvider::get_default()
                .expect("default crypto provider installed")
                .signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        CryptoProvider::get_default()
            .expect("default crypto provider installed")
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// SHA-256 digest of a certificate's DER-encoded SubjectPublicKeyInfo, base64-encoded.
fn spki_sha256_base64(cert_der: &CertificateDer<'_>) -> Result<String, TlsError> {
    use base64::Engine as _;

    let (_, cert) = x509_parser::parse_x509_certificate(cert_der.as_ref())
        .map_err(|e| TlsError::General(format!("failed to parse certificate: {e}")))?;
    let spki_der = cert.tbs_certificate.subject_pki.raw;
    let digest = Sha256::digest(spki_der);
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

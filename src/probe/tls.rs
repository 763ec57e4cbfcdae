//! TLS certificate inspection.
//!
//! Opens a handshake with certificate verification disabled so the leaf
//! certificate can be examined even when it is expired, self-signed, or
//! otherwise broken. Validity is judged locally from the certificate's
//! own window.

use chrono::{DateTime, TimeZone, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::prelude::*;

use super::ProbeError;

/// Metadata extracted from a site's leaf certificate.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Whether the inspection time falls inside the validity window.
    pub valid: bool,
    pub issuer: String,
    pub subject: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    /// Whole days until expiry; negative once expired.
    pub days_remaining: i64,
    /// Colon-separated lowercase hex serial number.
    pub serial: String,
    /// SHA-256 over the DER encoding, lowercase hex.
    pub fingerprint: String,
    pub signature_algorithm: String,
    pub self_signed: bool,
    /// Extended key usage permits server authentication. Absence of the
    /// extension leaves usage unrestricted, which counts as permitted.
    pub server_auth: bool,
}

/// Outcome of a certificate inspection request.
#[derive(Debug, Clone)]
pub enum TlsInspection {
    /// The URL does not use TLS; there is nothing to inspect.
    NotApplicable { reason: String },
    Report(CertificateInfo),
}

/// Inspect the certificate served at an HTTPS URL.
///
/// Handshake and connect failures come back as errors so the caller can
/// record "could not inspect" separately from "inspected and found bad".
pub async fn inspect_certificate(
    url: &str,
    timeout: Duration,
) -> Result<TlsInspection, ProbeError> {
    let parsed =
        Url::parse(url).map_err(|e| ProbeError::Config(format!("invalid URL: {}", e)))?;

    if parsed.scheme() != "https" {
        return Ok(TlsInspection::NotApplicable {
            reason: format!("scheme '{}' does not use TLS", parsed.scheme()),
        });
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ProbeError::Config("URL has no host".to_string()))?
        .to_string();
    let port = parsed.port().unwrap_or(443);

    let der = tokio::time::timeout(timeout, fetch_leaf_certificate(&host, port))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    let info = parse_certificate(&der, Utc::now())?;
    Ok(TlsInspection::Report(info))
}

/// Handshake with the server and return the leaf certificate DER.
async fn fetch_leaf_certificate(host: &str, port: u16) -> Result<Vec<u8>, ProbeError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CaptureCertVerifier(provider)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ProbeError::Config(format!("invalid server name: {}", host)))?;

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProbeError::Network(format!("connect failed: {}", e)))?;

    let connector = TlsConnector::from(Arc::new(config));
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProbeError::Tls(format!("handshake failed: {}", e)))?;

    let (_, session) = stream.get_ref();
    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| ProbeError::Tls("server presented no certificate".to_string()))?;

    Ok(leaf.as_ref().to_vec())
}

/// Verifier that accepts any server certificate. Signature checks still
/// run so the handshake itself stays honest; only chain and hostname
/// validation are skipped.
#[derive(Debug)]
struct CaptureCertVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for CaptureCertVerifier {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Extract certificate metadata from DER bytes, judged at `now`.
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<CertificateInfo, ProbeError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| ProbeError::Tls(format!("certificate parse failed: {}", e)))?;

    let valid_from = epoch_to_utc(cert.validity().not_before.timestamp())?;
    let valid_to = epoch_to_utc(cert.validity().not_after.timestamp())?;

    let issuer = cert.issuer().to_string();
    let subject = cert.subject().to_string();

    let signature_algorithm = oid2sn(&cert.signature_algorithm.algorithm, oid_registry())
        .map(|sn| sn.to_string())
        .unwrap_or_else(|_| cert.signature_algorithm.algorithm.to_id_string());

    let server_auth = cert
        .extended_key_usage()
        .ok()
        .flatten()
        .map(|ext| ext.value.server_auth || ext.value.any)
        .unwrap_or(true);

    Ok(CertificateInfo {
        valid: now >= valid_from && now <= valid_to,
        self_signed: issuer == subject,
        issuer,
        subject,
        valid_from,
        valid_to,
        days_remaining: days_until(now, valid_to),
        serial: cert.raw_serial_as_string(),
        fingerprint: hex::encode(Sha256::digest(der)),
        signature_algorithm,
        server_auth,
    })
}

/// Whole days from `now` until `deadline`, floored. A certificate that
/// expired an hour ago is at day -1, not day 0.
pub fn days_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> i64 {
    (deadline - now).num_seconds().div_euclid(86_400)
}

fn epoch_to_utc(secs: i64) -> Result<DateTime<Utc>, ProbeError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ProbeError::Tls("certificate validity out of range".to_string()))
}

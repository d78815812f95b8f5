use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::{objects::oid_registry, prelude::*};

use crate::{error::CertificateDecodeError, session::SecureSession};

/// Who the peer claims to be, read from its leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub subject:            String,
    pub issuer:             String,
    pub common_name:        Option<String>,
    /// Lowercase hex SHA-256 of the leaf certificate DER
    pub fingerprint_sha256: String,
    /// Certificates the peer sent, leaf included
    pub chain_len:          usize,
}

/// Reports the peer identity after the handshake.
///
/// `Ok(None)` means no certificate was presented, which only happens when
/// the policy did not ask for one.
pub fn extract(session: &SecureSession) -> Result<Option<PeerIdentity>, CertificateDecodeError> {
    let Some(chain) = session.peer_certificates() else {
        tracing::info!("The client does not have a certificate");
        return Ok(None);
    };
    let Some(leaf) = chain.first() else {
        return Ok(None);
    };

    let mut identity = decode(leaf)?;
    identity.chain_len = chain.len();

    tracing::info!("Client certificate:");
    tracing::info!("  subject: {}", identity.subject);
    tracing::info!("  issuer: {}", identity.issuer);
    tracing::debug!("  sha256: {}", identity.fingerprint_sha256);
    Ok(Some(identity))
}

/// Decodes subject and issuer from one DER certificate
pub fn decode(der: &CertificateDer<'_>) -> Result<PeerIdentity, CertificateDecodeError> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| CertificateDecodeError::Parse(e.to_string()))?;

    let subject = name_to_string(cert.subject(), "subject")?;
    let issuer = name_to_string(cert.issuer(), "issuer")?;
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());

    Ok(PeerIdentity {
        subject,
        issuer,
        common_name,
        fingerprint_sha256: hex::encode(Sha256::digest(der.as_ref())),
        chain_len: 1,
    })
}

fn name_to_string(name: &X509Name<'_>, field: &'static str) -> Result<String, CertificateDecodeError> {
    name.to_string_with_registry(oid_registry())
        .map_err(|e| CertificateDecodeError::Name {
            field,
            reason: e.to_string(),
        })
}

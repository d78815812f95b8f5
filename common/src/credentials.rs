use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    sign::CertifiedKey,
    InconsistentKeys, RootCertStore,
};
use rustls_pemfile::{certs, private_key};

/// Failures loading the local identity. All of them are static
/// configuration defects and abort startup.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read certificate from {path:?}: {source}")]
    CertificateUnreadable {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse certificate {path:?}: {reason}")]
    CertificateMalformed { path: PathBuf, reason: String },
    #[error("no certificate found in {path:?}")]
    NoCertificate { path: PathBuf },
    #[error("failed to read private key from {path:?}: {source}")]
    KeyUnreadable {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse private key {path:?}: {reason}")]
    KeyMalformed { path: PathBuf, reason: String },
    #[error("no private key found in {path:?}")]
    NoPrivateKey { path: PathBuf },
    #[error("unsupported private key in {path:?}: {source}")]
    UnsupportedKey {
        path:   PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("private key {key_path:?} does not match the certificate public key in {cert_path:?}")]
    KeyMismatch { cert_path: PathBuf, key_path: PathBuf },
}

/// Failures loading the trusted authority bundle
#[derive(Debug, thiserror::Error)]
pub enum TrustAnchorError {
    #[error("failed to read CA bundle from {path:?}: {source}")]
    Unreadable {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CA bundle {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("no valid CA certificates found in {path:?}")]
    NoValidAuthority { path: PathBuf },
}

/// A certificate chain and the private key matching its leaf.
///
/// Only constructed through [`Credential::load`], so holding one means the
/// key/certificate match has already been checked.
#[derive(Debug)]
pub struct Credential {
    cert_chain:  Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl Credential {
    /// Loads and cross-checks a PEM certificate chain and private key using
    /// the aws-lc-rs provider.
    pub fn load(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, CredentialError> {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        Self::load_with_provider(cert_path, key_path, &provider)
    }

    /// Same as [`Credential::load`] with an explicit crypto provider
    pub fn load_with_provider(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        provider: &CryptoProvider,
    ) -> Result<Self, CredentialError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        tracing::debug!("Loading certificate chain from {:?}", cert_path);

        let cert_pem = fs::read(cert_path).map_err(|source| {
            CredentialError::CertificateUnreadable {
                path: cert_path.to_path_buf(),
                source,
            }
        })?;
        let cert_chain = certs(&mut BufReader::new(&*cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CredentialError::CertificateMalformed {
                path:   cert_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if cert_chain.is_empty() {
            return Err(CredentialError::NoCertificate {
                path: cert_path.to_path_buf(),
            });
        }

        tracing::debug!("Loading private key from {:?}", key_path);
        let key_pem = fs::read(key_path).map_err(|source| CredentialError::KeyUnreadable {
            path: key_path.to_path_buf(),
            source,
        })?;
        let private_key = private_key(&mut BufReader::new(&*key_pem))
            .map_err(|e| CredentialError::KeyMalformed {
                path:   key_path.to_path_buf(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CredentialError::NoPrivateKey {
                path: key_path.to_path_buf(),
            })?;

        let signing_key = provider
            .key_provider
            .load_private_key(private_key.clone_key())
            .map_err(|source| CredentialError::UnsupportedKey {
                path: key_path.to_path_buf(),
                source,
            })?;

        match CertifiedKey::new(cert_chain.clone(), signing_key).keys_match() {
            Ok(()) => {}
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
                return Err(CredentialError::KeyMismatch {
                    cert_path: cert_path.to_path_buf(),
                    key_path:  key_path.to_path_buf(),
                });
            }
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
                tracing::warn!(
                    "Key type in {:?} cannot expose its public key; skipping match check",
                    key_path
                );
            }
            Err(e) => {
                return Err(CredentialError::CertificateMalformed {
                    path:   cert_path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(
            "Loaded credential: {} certificate(s) from {:?}",
            cert_chain.len(),
            cert_path
        );
        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.cert_chain[0]
    }

    /// Copies of the chain and key in the form rustls config builders take
    pub fn to_rustls_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.cert_chain.clone(), self.private_key.clone_key())
    }
}

/// Authority certificates used to validate a peer chain
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    roots:           Arc<RootCertStore>,
    authorities:     Vec<CertificateDer<'static>>,
    max_chain_depth: usize,
}

impl TrustAnchor {
    /// Loads a PEM authority bundle. At least one certificate in it must be
    /// usable as a trust anchor.
    pub fn load(ca_path: impl AsRef<Path>, max_chain_depth: usize) -> Result<Self, TrustAnchorError> {
        let ca_path = ca_path.as_ref();
        tracing::debug!("Loading CA bundle from {:?}", ca_path);

        let ca_pem = fs::read(ca_path).map_err(|source| TrustAnchorError::Unreadable {
            path: ca_path.to_path_buf(),
            source,
        })?;
        let authorities = certs(&mut BufReader::new(&*ca_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TrustAnchorError::Malformed {
                path:   ca_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut root_store = RootCertStore::empty();
        let (added, ignored) = root_store.add_parsable_certificates(authorities.iter().cloned());
        if ignored > 0 {
            tracing::warn!("Ignored {} unparsable certificate(s) in {:?}", ignored, ca_path);
        }
        if added == 0 {
            return Err(TrustAnchorError::NoValidAuthority {
                path: ca_path.to_path_buf(),
            });
        }

        tracing::info!("Loaded {} trusted authority certificate(s)", added);
        Ok(Self {
            roots: Arc::new(root_store),
            authorities,
            max_chain_depth,
        })
    }

    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// Raw authority certificates as they appeared in the bundle
    pub fn authorities(&self) -> &[CertificateDer<'static>] {
        &self.authorities
    }

    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    pub fn is_authority(&self, cert: &CertificateDer<'_>) -> bool {
        self.authorities
            .iter()
            .any(|authority| authority.as_ref() == cert.as_ref())
    }
}

use std::sync::Arc;

use rustls::{
    client::danger::HandshakeSignatureValid,
    crypto::CryptoProvider,
    pki_types::{CertificateDer, UnixTime},
    server::{
        danger::{ClientCertVerified, ClientCertVerifier},
        VerifierBuilderError, WebPkiClientVerifier,
    },
    CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme,
};
use singleshot_common::TrustAnchor;
use x509_parser::prelude::*;

/// Client certificate verifier that requires a certificate, validates it
/// with webpki against the trust anchor, and caps the number of untrusted
/// intermediates at the anchor's chain depth.
#[derive(Debug)]
pub struct DepthLimitedVerifier {
    inner:  Arc<dyn ClientCertVerifier>,
    anchor: TrustAnchor,
}

impl DepthLimitedVerifier {
    pub fn new(
        anchor: TrustAnchor,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, VerifierBuilderError> {
        let inner = WebPkiClientVerifier::builder_with_provider(anchor.roots(), provider).build()?;
        Ok(Self { inner, anchor })
    }

    /// Length of the issuer path from the leaf through the presented
    /// intermediates, stopping at the first certificate issued by a trust
    /// anchor. Certificates the peer sent that are not on that path do not
    /// count.
    fn chain_depth(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> usize {
        let candidates: Vec<X509Certificate<'_>> = intermediates
            .iter()
            .filter(|cert| !self.anchor.is_authority(cert))
            .filter_map(|cert| X509Certificate::from_der(cert.as_ref()).ok().map(|(_, c)| c))
            .collect();
        let Ok((_, leaf)) = X509Certificate::from_der(end_entity.as_ref()) else {
            return candidates.len();
        };

        let mut used = vec![false; candidates.len()];
        let mut issuer = leaf.issuer().as_raw();
        let mut depth = 0;
        while let Some(next) = (0..candidates.len())
            .find(|&i| !used[i] && candidates[i].subject().as_raw() == issuer)
        {
            used[next] = true;
            depth += 1;
            issuer = candidates[next].issuer().as_raw();
        }
        depth
    }
}

impl ClientCertVerifier for DepthLimitedVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;

        let depth = self.chain_depth(end_entity, intermediates);
        if depth > self.anchor.max_chain_depth() {
            tracing::warn!(
                "Rejecting peer chain with {} intermediate(s), limit is {}",
                depth,
                self.anchor.max_chain_depth()
            );
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ));
        }

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
        KeyPair, KeyUsagePurpose,
    };

    use super::*;

    struct Issued {
        cert: Certificate,
        key:  KeyPair,
    }

    fn ca(name: &str, parent: Option<&Issued>) -> Issued {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let cert = match parent {
            Some(parent) => params.signed_by(&key, &parent.cert, &parent.key).unwrap(),
            None => params.self_signed(&key).unwrap(),
        };
        Issued { cert, key }
    }

    fn client_leaf(issuer: &Issued) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "client");
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.signed_by(&key, &issuer.cert, &issuer.key).unwrap()
    }

    fn verifier(root: &Issued, depth: usize) -> DepthLimitedVerifier {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root-ca.pem");
        std::fs::write(&path, root.cert.pem()).unwrap();
        let anchor = TrustAnchor::load(&path, depth).unwrap();
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        DepthLimitedVerifier::new(anchor, provider).unwrap()
    }

    #[test]
    fn intermediate_counts_against_depth() {
        let root = ca("Root", None);
        let intermediate = ca("Intermediate", Some(&root));
        let leaf = client_leaf(&intermediate);
        let chain = [intermediate.cert.der().clone()];

        assert!(verifier(&root, 1)
            .verify_client_cert(leaf.der(), &chain, UnixTime::now())
            .is_ok());
        assert!(matches!(
            verifier(&root, 0).verify_client_cert(leaf.der(), &chain, UnixTime::now()),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure
            ))
        ));
    }

    #[test]
    fn certificates_off_the_path_are_not_counted() {
        let root = ca("Root", None);
        let intermediate = ca("Intermediate", Some(&root));
        let stray = ca("Unrelated CA", None);
        let leaf = client_leaf(&intermediate);
        let chain = [intermediate.cert.der().clone(), stray.cert.der().clone()];

        let verifier = verifier(&root, 1);
        assert_eq!(verifier.chain_depth(leaf.der(), &chain), 1);
        assert!(verifier
            .verify_client_cert(leaf.der(), &chain, UnixTime::now())
            .is_ok());
    }

    #[test]
    fn leaf_issued_by_anchor_has_depth_zero() {
        let root = ca("Root", None);
        let leaf = client_leaf(&root);
        let verifier = verifier(&root, 0);
        // The peer may send the root along; it is never counted
        let chain = [root.cert.der().clone()];
        assert_eq!(verifier.chain_depth(leaf.der(), &chain), 0);
        assert!(verifier
            .verify_client_cert(leaf.der(), &chain, UnixTime::now())
            .is_ok());
    }
}

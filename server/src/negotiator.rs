use std::{net::TcpStream, sync::Arc, time::Duration};

use rustls::{crypto::CryptoProvider, ServerConfig, ServerConnection};
use singleshot_common::{
    check_receive_capacity, ConfigError, Credential, EndpointConfig, SessionPolicy, TrustAnchor,
};
use uuid::Uuid;

use crate::{
    error::{ConfigurationError, HandshakeError},
    listener::RawChannel,
    session::SecureSession,
    shutdown::release_transport,
    verifier::DepthLimitedVerifier,
};

/// The TLS configuration for one endpoint, owned explicitly rather than
/// installed as process-wide state.
#[derive(Clone)]
pub struct TlsContext {
    config:       Arc<ServerConfig>,
    policy:       SessionPolicy,
    close_linger: Duration,
}

impl TlsContext {
    /// Builds the context from an already loaded credential.
    ///
    /// With `require_peer_certificate` set the trust anchor is mandatory and
    /// its chain depth must agree with the policy; otherwise no certificate
    /// request is sent and the anchor is ignored.
    pub fn new(
        credential: &Credential,
        trust_anchor: Option<TrustAnchor>,
        policy: SessionPolicy,
    ) -> Result<Self, ConfigurationError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        Self::with_provider(credential, trust_anchor, policy, provider)
    }

    pub fn with_provider(
        credential: &Credential,
        trust_anchor: Option<TrustAnchor>,
        policy: SessionPolicy,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ConfigurationError> {
        check_receive_capacity(policy.receive_capacity())?;
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;
        let (cert_chain, private_key) = credential.to_rustls_parts();

        let config = if policy.require_peer_certificate() {
            let anchor = trust_anchor.ok_or(ConfigError::MissingTrustAnchor)?;
            if anchor.max_chain_depth() != policy.max_chain_depth() {
                return Err(ConfigurationError::PolicyMismatch {
                    policy: policy.max_chain_depth(),
                    anchor: anchor.max_chain_depth(),
                });
            }

            tracing::info!(
                "Peer certificates required, verification depth {}",
                policy.max_chain_depth()
            );
            let verifier = DepthLimitedVerifier::new(anchor, provider)?;
            builder
                .with_client_cert_verifier(Arc::new(verifier))
                .with_single_cert(cert_chain, private_key)?
        } else {
            tracing::info!("Peer certificates not requested");
            builder
                .with_no_client_auth()
                .with_single_cert(cert_chain, private_key)?
        };

        Ok(Self {
            config: Arc::new(config),
            policy,
            close_linger: Duration::from_secs(2),
        })
    }

    /// Loads every credential the configuration names and builds the
    /// context. Nothing here touches the network.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let policy = config.policy();

        tracing::info!("Creating TLS context with certificates:");
        tracing::info!("  - Cert: {:?}", config.certs.cert_path);
        tracing::info!("  - Key: {:?}", config.certs.key_path);
        let credential = Credential::load(&config.certs.cert_path, &config.certs.key_path)?;

        let trust_anchor = match (&config.certs.ca_path, policy.require_peer_certificate()) {
            (Some(ca_path), true) => {
                tracing::info!("  - CA cert: {:?}", ca_path);
                Some(TrustAnchor::load(ca_path, policy.max_chain_depth())?)
            }
            _ => None,
        };

        Ok(Self::new(&credential, trust_anchor, policy)?.with_close_linger(config.close_linger()))
    }

    pub fn with_close_linger(mut self, linger: Duration) -> Self {
        self.close_linger = linger;
        self
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Runs the server side of the handshake on `channel`.
    ///
    /// On failure the raw channel is released before the error is returned.
    pub fn negotiate(
        &self,
        channel: RawChannel,
        session_id: Uuid,
    ) -> Result<SecureSession, HandshakeError> {
        let (mut stream, peer_addr) = channel.into_parts();

        let mut conn = match ServerConnection::new(Arc::clone(&self.config)) {
            Ok(conn) => conn,
            Err(e) => {
                release_transport(stream);
                return Err(HandshakeError::from_tls(e));
            }
        };

        tracing::info!("Performing TLS handshake...");
        if let Err(e) = complete_handshake(&mut conn, &mut stream) {
            tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
            release_transport(stream);
            return Err(e);
        }

        let session = SecureSession::established(
            session_id,
            peer_addr,
            conn,
            stream,
            self.policy,
            self.close_linger,
        );
        tracing::info!(
            "TLS connection using {} ({})",
            session.cipher_suite(),
            session.protocol_version()
        );
        Ok(session)
    }
}

/// Drives rustls until the handshake is done, flushing anything queued
/// afterwards (TLS 1.3 session tickets, the final flight).
fn complete_handshake(
    conn: &mut ServerConnection,
    stream: &mut TcpStream,
) -> Result<(), HandshakeError> {
    while conn.is_handshaking() {
        while conn.wants_write() {
            conn.write_tls(stream).map_err(HandshakeError::from_io)?;
        }
        if conn.wants_read() {
            if conn.read_tls(stream).map_err(HandshakeError::from_io)? == 0 {
                return Err(HandshakeError::PeerClosed);
            }
            if let Err(e) = conn.process_new_packets() {
                // Deliver the alert rustls queued for the peer
                let _ = conn.write_tls(stream);
                return Err(HandshakeError::from_tls(e));
            }
        }
    }
    while conn.wants_write() {
        conn.write_tls(stream).map_err(HandshakeError::from_io)?;
    }
    Ok(())
}

use std::{io, net::SocketAddr, time::Duration};

use singleshot_common::{ConfigError, CredentialError, TrustAnchorError};

use crate::session::SessionState;

/// Static configuration defects, detected before any network I/O
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    TrustAnchor(#[from] TrustAnchorError),
    #[error("policy expects chain depth {policy} but the trust anchor was loaded with {anchor}")]
    PolicyMismatch { policy: usize, anchor: usize },
    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
    #[error("failed to build TLS context: {0}")]
    Tls(#[from] rustls::Error),
}

/// Listener and socket setup failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr:   SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    #[error("no connection arrived within {0:?}")]
    AcceptTimedOut(Duration),
    #[error("accept cancelled before a connection arrived")]
    Cancelled,
    #[error("failed to configure accepted socket: {0}")]
    Socket(#[source] io::Error),
}

/// Faults while negotiating the secure session. Terminal for the session.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("peer closed the connection during the handshake")]
    PeerClosed,
    #[error("peer did not present a certificate")]
    CertificateRequired,
    #[error("peer certificate rejected: {0}")]
    CertificateRejected(#[source] rustls::Error),
    #[error("handshake failed: {0}")]
    Protocol(#[source] rustls::Error),
    #[error("handshake timed out")]
    TimedOut,
    #[error("socket error during handshake: {0}")]
    Io(#[source] io::Error),
}

impl HandshakeError {
    pub(crate) fn from_tls(err: rustls::Error) -> Self {
        match err {
            rustls::Error::NoCertificatesPresented => HandshakeError::CertificateRequired,
            rustls::Error::InvalidCertificate(_) => HandshakeError::CertificateRejected(err),
            other => HandshakeError::Protocol(other),
        }
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => HandshakeError::TimedOut,
            io::ErrorKind::UnexpectedEof => HandshakeError::PeerClosed,
            _ => HandshakeError::Io(err),
        }
    }
}

/// Faults during the one-shot request/reply exchange
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("peer closed the session before sending a request")]
    PeerClosed,
    #[error("request exceeds the {capacity} byte receive buffer")]
    Oversized { capacity: usize },
    #[error("timed out waiting for the peer")]
    TimedOut,
    #[error("failed to read request: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write reply: {0}")]
    Write(#[source] io::Error),
}

impl ExchangeError {
    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ExchangeError::TimedOut,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => ExchangeError::PeerClosed,
            _ => ExchangeError::Read(err),
        }
    }

    pub(crate) fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ExchangeError::TimedOut,
            _ => ExchangeError::Write(err),
        }
    }
}

/// Close-notify could not be delivered. Never blocks resource release.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("failed to send close-notify: {0}")]
    CloseNotify(#[source] io::Error),
}

/// The peer certificate could not be turned into readable names.
/// The session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateDecodeError {
    #[error("failed to parse peer certificate: {0}")]
    Parse(String),
    #[error("failed to decode {field} name: {reason}")]
    Name { field: &'static str, reason: String },
}

/// Top-level failure of one endpoint run
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("data exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

impl EndpointError {
    /// The last state the session reached before the failure
    pub fn stage(&self) -> SessionState {
        match self {
            EndpointError::Configuration(_) => SessionState::Unbound,
            EndpointError::Transport(TransportError::Bind { .. }) => SessionState::Unbound,
            EndpointError::Transport(TransportError::Socket(_)) => SessionState::Accepted,
            EndpointError::Transport(_) => SessionState::Listening,
            EndpointError::Handshake(_) => SessionState::Handshaking,
            EndpointError::Exchange(_) => SessionState::Established,
        }
    }
}

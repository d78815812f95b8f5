use std::{
    fmt,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use rustls::{pki_types::CertificateDer, ServerConnection};
use singleshot_common::SessionPolicy;
use uuid::Uuid;

use crate::{
    error::ShutdownError,
    shutdown::{self, CloseOutcome},
};

/// Lifecycle of the single session an endpoint runs. Transitions only move
/// forward; `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unbound,
    Listening,
    Accepted,
    Handshaking,
    Established,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unbound => "UNBOUND",
            SessionState::Listening => "LISTENING",
            SessionState::Accepted => "ACCEPTED",
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Failed => "FAILED",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Transport {
    conn:   ServerConnection,
    stream: TcpStream,
}

/// An established TLS session over the accepted connection.
///
/// The session owns the socket and the rustls connection until
/// [`SecureSession::close`] runs; dropping an open session closes it.
#[derive(Debug)]
pub struct SecureSession {
    id:               Uuid,
    peer_addr:        SocketAddr,
    cipher_suite:     String,
    protocol_version: String,
    policy:           SessionPolicy,
    close_linger:     Duration,
    transport:        Option<Transport>,
    state:            SessionState,
}

impl SecureSession {
    pub(crate) fn established(
        id: Uuid,
        peer_addr: SocketAddr,
        conn: ServerConnection,
        stream: TcpStream,
        policy: SessionPolicy,
        close_linger: Duration,
    ) -> Self {
        let cipher_suite = conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
            .unwrap_or_else(|| "unknown".to_string());
        let protocol_version = conn
            .protocol_version()
            .map(|version| format!("{:?}", version))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            id,
            peer_addr,
            cipher_suite,
            protocol_version,
            policy,
            close_linger,
            transport: Some(Transport { conn, stream }),
            state: SessionState::Established,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Negotiated cipher suite, e.g. `TLS13_AES_256_GCM_SHA384`
    pub fn cipher_suite(&self) -> &str {
        &self.cipher_suite
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Certificates the peer presented, leaf first
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.transport
            .as_ref()
            .and_then(|transport| transport.conn.peer_certificates())
    }

    /// Close-notify, then the socket, then the TLS state.
    ///
    /// A failed close-notify is returned as an error but the socket and
    /// connection are released regardless. Calling this again after the
    /// session is closed does nothing.
    pub fn close(&mut self) -> Result<CloseOutcome, ShutdownError> {
        let Some(Transport { mut conn, mut stream }) = self.transport.take() else {
            tracing::debug!("Session {} already closed", self.id);
            return Ok(CloseOutcome::default());
        };

        let outcome = shutdown::close_secure(&mut conn, &mut stream, self.close_linger);
        shutdown::release_transport(stream);
        drop(conn);
        self.state = SessionState::Closed;

        match &outcome {
            Ok(_) => tracing::info!("Session {} closed", self.id),
            Err(e) => tracing::warn!("Session {} closed without close-notify: {}", self.id, e),
        }
        outcome
    }

    fn stream(&mut self) -> io::Result<rustls::Stream<'_, ServerConnection, TcpStream>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session is closed"))?;
        Ok(rustls::Stream::new(&mut transport.conn, &mut transport.stream))
    }
}

impl Read for SecureSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for SecureSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

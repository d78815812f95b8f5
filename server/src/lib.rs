//! Singleshot Server Library
//!
//! A TLS endpoint that accepts exactly one TCP connection, negotiates a
//! secure session with optional mutual authentication, exchanges one
//! request/reply pair and closes the session with close-notify.
//!
//! The session moves strictly forward through
//! `UNBOUND -> LISTENING -> ACCEPTED -> HANDSHAKING -> ESTABLISHED -> CLOSED`,
//! with `FAILED` reachable from every stage before `ESTABLISHED`. Every
//! failure comes back as a typed [`EndpointError`]; nothing here exits the
//! process.
//!
//! # Example
//!
//! ```no_run
//! use singleshot_common::EndpointConfig;
//! use singleshot_server::Endpoint;
//!
//! # fn main() -> anyhow::Result<()> {
//! let report = Endpoint::new(EndpointConfig::default())?.run()?;
//! println!("cipher: {}", report.cipher_suite);
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod listener;
pub mod negotiator;
pub mod session;
pub mod shutdown;
pub mod verifier;

pub use endpoint::{Endpoint, ListeningEndpoint, SessionReport};
pub use error::{
    CertificateDecodeError, ConfigurationError, EndpointError, ExchangeError, HandshakeError,
    ShutdownError, TransportError,
};
pub use exchange::Exchange;
pub use identity::PeerIdentity;
pub use listener::{RawChannel, TransportListener};
pub use negotiator::TlsContext;
pub use session::{SecureSession, SessionState};
pub use shutdown::CloseOutcome;

//! Singleshot Client Library
//!
//! Connects to a singleshot TLS endpoint, optionally presenting a client
//! certificate, sends one message and reads the reply until the server
//! closes the session.
//!
//! # Example
//!
//! ```no_run
//! use singleshot_client::{ClientConfig, SecureClient};
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = SecureClient::new(ClientConfig::default())?;
//! let reply = client.exchange("127.0.0.1:5555", b"Hello, server")?;
//! println!("{}", String::from_utf8_lossy(&reply));
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::{ClientConfig, Connection, SecureClient};
pub use singleshot_common::{CertPaths, DEFAULT_PORT};

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rustls::{
    pki_types::ServerName, ClientConfig as RustlsClientConfig, ClientConnection, StreamOwned,
};
use singleshot_common::{CertPaths, Credential, TrustAnchor, DEFAULT_MAX_CHAIN_DEPTH};

/// Configuration for the singleshot client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client certificate, key and the CA used to verify the server
    pub cert_path:           CertPaths,
    /// Present the client certificate during the handshake
    pub present_certificate: bool,
    /// Name the server certificate must be valid for
    pub server_name:         String,
    /// Connect, read and write timeout
    pub timeout:             Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cert_path:           CertPaths::client(),
            present_certificate: true,
            server_name:         "localhost".to_string(),
            timeout:             Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Creates a client configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cert_path(mut self, cert_path: CertPaths) -> Self {
        self.cert_path = cert_path;
        self
    }

    /// Connect without offering a client certificate
    pub fn without_certificate(mut self) -> Self {
        self.present_certificate = false;
        self
    }

    pub fn with_server_name<S: Into<String>>(mut self, server_name: S) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A TLS client that sends one message to a singleshot endpoint
pub struct SecureClient {
    tls_config:  Arc<RustlsClientConfig>,
    server_name: ServerName<'static>,
    timeout:     Duration,
}

impl SecureClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let ca_path = config
            .cert_path
            .ca_path
            .as_ref()
            .ok_or_else(|| anyhow!("No CA certificate configured for server verification"))?;
        let anchor = TrustAnchor::load(ca_path, DEFAULT_MAX_CHAIN_DEPTH)
            .context("Failed to load CA certificate")?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = RustlsClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .context("Failed to select TLS protocol versions")?
            .with_root_certificates(anchor.roots());

        let tls_config = if config.present_certificate {
            let credential =
                Credential::load(&config.cert_path.cert_path, &config.cert_path.key_path)
                    .context("Failed to load client certificate")?;
            let (cert_chain, private_key) = credential.to_rustls_parts();
            builder
                .with_client_auth_cert(cert_chain, private_key)
                .context("Failed to build TLS client configuration")?
        } else {
            tracing::debug!("Connecting without a client certificate");
            builder.with_no_client_auth()
        };

        let server_name = ServerName::try_from(config.server_name.clone())
            .map_err(|_| anyhow!("Invalid server name {:?}", config.server_name))?;

        Ok(Self {
            tls_config: Arc::new(tls_config),
            server_name,
            timeout: config.timeout,
        })
    }

    /// Opens a TCP connection and completes the TLS handshake
    pub fn connect(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        let addr = addr
            .to_socket_addrs()
            .context("Failed to resolve server address")?
            .next()
            .ok_or_else(|| anyhow!("Server address resolved to nothing"))?;
        tracing::debug!("Connecting to {}", addr);

        let sock = TcpStream::connect_timeout(&addr, self.timeout)
            .with_context(|| format!("Failed to connect to {addr}"))?;
        sock.set_read_timeout(Some(self.timeout))?;
        sock.set_write_timeout(Some(self.timeout))?;

        let conn = ClientConnection::new(Arc::clone(&self.tls_config), self.server_name.clone())
            .context("Failed to create TLS connection")?;
        let mut stream = StreamOwned::new(conn, sock);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .context("TLS handshake failed")?;
        }

        if let Some(suite) = stream.conn.negotiated_cipher_suite() {
            tracing::info!("Connected to {} using {:?}", addr, suite.suite());
        }
        Ok(Connection { stream, addr })
    }

    /// Connects, sends `message`, and returns everything the server wrote
    /// back before closing.
    pub fn exchange(&self, addr: impl ToSocketAddrs, message: &[u8]) -> Result<Vec<u8>> {
        let mut connection = self.connect(addr)?;
        connection.send(message)?;
        let reply = connection.read_reply()?;
        connection.close()?;
        Ok(reply)
    }
}

/// An established connection to the endpoint
pub struct Connection {
    stream: StreamOwned<ClientConnection, TcpStream>,
    addr:   SocketAddr,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn cipher_suite(&self) -> Option<String> {
        self.stream
            .conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }

    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        self.stream
            .write_all(message)
            .context("Failed to send message")?;
        self.stream.flush().context("Failed to flush message")?;
        tracing::debug!("Sent {} bytes", message.len());
        Ok(())
    }

    /// Reads until the server sends close-notify
    pub fn read_reply(&mut self) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        self.stream
            .read_to_end(&mut reply)
            .context("Failed to read reply")?;
        tracing::debug!("Received {} bytes", reply.len());
        Ok(reply)
    }

    /// Sends close-notify and flushes it to the socket
    pub fn close(mut self) -> Result<()> {
        self.stream.conn.send_close_notify();
        while self.stream.conn.wants_write() {
            self.stream
                .conn
                .write_tls(&mut self.stream.sock)
                .context("Failed to send close-notify")?;
        }
        Ok(())
    }
}

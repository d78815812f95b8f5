use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::policy::{OversizePolicy, SessionPolicy};

/// Port the endpoint listens on when nothing else is configured
pub const DEFAULT_PORT: u16 = 5555;

/// Size of the single application read
pub const DEFAULT_RECEIVE_CAPACITY: usize = 4096;

/// Reply sent after the request has been received
pub const DEFAULT_REPLY: &str = "This message is from the TLS server";

/// Largest request one read can return: the TLS plaintext record limit
pub const MAX_RECEIVE_CAPACITY: usize = 16 * 1024;

/// Verification depth used when mutual authentication is enabled
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 1;

const CERTS_DIR_ENV: &str = "SINGLESHOT_CERTS_DIR";
const PORT_ENV: &str = "SINGLESHOT_PORT";
const VERIFY_CLIENT_ENV: &str = "SINGLESHOT_VERIFY_CLIENT";
const DEFAULT_CERTS_DIR: &str = "certs";

fn get_certs_dir() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Certificate paths for one TLS identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPaths {
    /// Path to the certificate chain (leaf first)
    pub cert_path: PathBuf,
    /// Path to the private key matching the leaf certificate
    pub key_path:  PathBuf,
    /// Path to the trusted authority bundle, if any
    pub ca_path:   Option<PathBuf>,
}

impl CertPaths {
    /// Creates CertPaths with the default server locations inside the
    /// certificate directory.
    pub fn new() -> Self {
        Self::in_dir(get_certs_dir())
    }

    /// Server certificate, key and root CA inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let base = dir.as_ref();
        Self {
            cert_path: base.join("server.pem"),
            key_path:  base.join("server.key.pem"),
            ca_path:   Some(base.join("root-ca.pem")),
        }
    }

    /// Client certificate, key and root CA in the certificate directory
    pub fn client() -> Self {
        Self::client_in_dir(get_certs_dir())
    }

    /// Client certificate, key and root CA inside `dir`
    pub fn client_in_dir(dir: impl AsRef<Path>) -> Self {
        let base = dir.as_ref();
        Self {
            cert_path: base.join("client.pem"),
            key_path:  base.join("client.key.pem"),
            ca_path:   Some(base.join("root-ca.pem")),
        }
    }
}

impl Default for CertPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// What the endpoint writes back after receiving the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// A fixed payload, independent of the request
    Fixed(String),
    /// The received request bytes, unchanged
    Echo,
}

impl Reply {
    /// Resolves the payload for a given request
    pub fn payload<'a>(&'a self, request: &'a [u8]) -> &'a [u8] {
        match self {
            Reply::Fixed(text) => text.as_bytes(),
            Reply::Echo => request,
        }
    }
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Fixed(DEFAULT_REPLY.to_string())
    }
}

/// Configuration problems that are detected before any credential is read
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path:   PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("peer verification is enabled but no trusted authority bundle is configured")]
    MissingTrustAnchor,
    #[error("receive capacity must be greater than zero")]
    ZeroCapacity,
    #[error("receive capacity {capacity} exceeds the {max} byte TLS record limit")]
    CapacityTooLarge { capacity: usize, max: usize },
}

/// Everything the endpoint needs to run one session.
///
/// Built once at startup. Every field has a default so a JSON file only
/// needs to name the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub bind_addr:                IpAddr,
    pub port:                     u16,
    pub certs:                    CertPaths,
    pub require_peer_certificate: bool,
    pub max_chain_depth:          usize,
    pub receive_capacity:         usize,
    pub oversize:                 OversizePolicy,
    pub reply:                    Reply,
    /// Read/write timeout on the accepted socket, in milliseconds
    pub io_timeout_ms:            Option<u64>,
    /// Give up waiting for a connection after this many milliseconds
    pub accept_timeout_ms:        Option<u64>,
    /// How long to wait for the peer's close-notify, in milliseconds
    pub close_linger_ms:          u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_addr:                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port:                     DEFAULT_PORT,
            certs:                    CertPaths::new(),
            require_peer_certificate: true,
            max_chain_depth:          DEFAULT_MAX_CHAIN_DEPTH,
            receive_capacity:         DEFAULT_RECEIVE_CAPACITY,
            oversize:                 OversizePolicy::default(),
            reply:                    Reply::default(),
            io_timeout_ms:            None,
            accept_timeout_ms:        None,
            close_linger_ms:          2_000,
        }
    }
}

impl EndpointConfig {
    /// Creates a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON configuration file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies SINGLESHOT_CERTS_DIR, SINGLESHOT_PORT and
    /// SINGLESHOT_VERIFY_CLIENT from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| env::var(var).ok())
    }

    /// Applies overrides read through `lookup`, keyed by environment
    /// variable name. A certs directory replaces every cert path, including
    /// ones set by a config file.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(CERTS_DIR_ENV) {
            self.certs = CertPaths::in_dir(dir);
        }

        if let Some(port) = lookup(PORT_ENV) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var:   PORT_ENV,
                value: port,
            })?;
        }

        if let Some(verify) = lookup(VERIFY_CLIENT_ENV) {
            self.require_peer_certificate =
                parse_verify_toggle(&verify).ok_or(ConfigError::InvalidEnv {
                    var:   VERIFY_CLIENT_ENV,
                    value: verify,
                })?;
        }

        Ok(self)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_certs(mut self, certs: CertPaths) -> Self {
        self.certs = certs;
        self
    }

    pub fn with_peer_verification(mut self, required: bool) -> Self {
        self.require_peer_certificate = required;
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn with_receive_capacity(mut self, capacity: usize) -> Self {
        self.receive_capacity = capacity;
        self
    }

    pub fn with_oversize(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn with_close_linger(mut self, linger: Duration) -> Self {
        self.close_linger_ms = millis(linger);
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_linger(&self) -> Duration {
        Duration::from_millis(self.close_linger_ms)
    }

    /// Checks combinations that cannot work before anything is loaded
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.require_peer_certificate && self.certs.ca_path.is_none() {
            return Err(ConfigError::MissingTrustAnchor);
        }
        check_receive_capacity(self.receive_capacity)
    }

    /// The immutable policy for the session this configuration drives
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy::new(self.require_peer_certificate, self.max_chain_depth)
            .with_receive_capacity(self.receive_capacity)
            .with_oversize(self.oversize)
    }
}

/// A receive capacity must be non-zero and fit in one TLS record
pub fn check_receive_capacity(capacity: usize) -> Result<(), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::ZeroCapacity);
    }
    if capacity > MAX_RECEIVE_CAPACITY {
        return Err(ConfigError::CapacityTooLarge {
            capacity,
            max: MAX_RECEIVE_CAPACITY,
        });
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Interprets the verification toggle the same way on the command line and
/// in the environment: `0` disables, any other integer enables.
pub fn parse_verify_toggle(raw: &str) -> Option<bool> {
    raw.trim().parse::<i64>().ok().map(|v| v != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_endpoint() {
        let config = EndpointConfig::default();
        assert_eq!(config.port, 5555);
        assert!(config.require_peer_certificate);
        assert_eq!(config.max_chain_depth, 1);
        assert_eq!(config.receive_capacity, 4096);
        assert_eq!(config.oversize, OversizePolicy::Reject);
        assert_eq!(config.reply, Reply::Fixed(DEFAULT_REPLY.to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cert_paths_use_conventional_names() {
        let server = CertPaths::in_dir("/etc/singleshot");
        assert_eq!(server.cert_path, PathBuf::from("/etc/singleshot/server.pem"));
        assert_eq!(server.key_path, PathBuf::from("/etc/singleshot/server.key.pem"));
        let client = CertPaths::client_in_dir("/etc/singleshot");
        assert_eq!(client.cert_path, PathBuf::from("/etc/singleshot/client.pem"));
        assert_eq!(client.ca_path, Some(PathBuf::from("/etc/singleshot/root-ca.pem")));
    }

    #[test]
    fn verify_toggle_follows_integer_semantics() {
        assert_eq!(parse_verify_toggle("0"), Some(false));
        assert_eq!(parse_verify_toggle("1"), Some(true));
        assert_eq!(parse_verify_toggle(" 7 "), Some(true));
        assert_eq!(parse_verify_toggle("yes"), None);
    }

    #[test]
    fn mutual_auth_without_ca_is_rejected() {
        let mut certs = CertPaths::in_dir("certs");
        certs.ca_path = None;
        let config = EndpointConfig::new().with_certs(certs.clone());
        assert!(matches!(config.validate(), Err(ConfigError::MissingTrustAnchor)));

        let config = EndpointConfig::new().with_certs(certs).with_peer_verification(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = EndpointConfig::new().with_receive_capacity(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn capacity_is_capped_at_one_record() {
        let config = EndpointConfig::new().with_receive_capacity(MAX_RECEIVE_CAPACITY);
        assert!(config.validate().is_ok());

        let config = EndpointConfig::new().with_receive_capacity(usize::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapacityTooLarge { capacity: usize::MAX, .. })
        ));
    }

    #[test]
    fn huge_durations_saturate() {
        let config = EndpointConfig::new()
            .with_io_timeout(Duration::MAX)
            .with_accept_timeout(Duration::from_millis(1500))
            .with_close_linger(Duration::MAX);
        assert_eq!(config.io_timeout_ms, Some(u64::MAX));
        assert_eq!(config.accept_timeout_ms, Some(1500));
        assert_eq!(config.close_linger_ms, u64::MAX);
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");
        fs::write(
            &path,
            r#"{ "port": 6000, "certs": { "cert_path": "a.pem", "key_path": "a.key", "ca_path": null } }"#,
        )
        .unwrap();

        let config = EndpointConfig::from_file(&path)
            .unwrap()
            .with_overrides_from(|var| match var {
                "SINGLESHOT_CERTS_DIR" => Some("/srv/pki".to_string()),
                "SINGLESHOT_PORT" => Some("7000".to_string()),
                "SINGLESHOT_VERIFY_CLIENT" => Some("0".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.certs, CertPaths::in_dir("/srv/pki"));
        assert_eq!(config.port, 7000);
        assert!(!config.require_peer_certificate);
    }

    #[test]
    fn absent_environment_changes_nothing() {
        let config = EndpointConfig::new()
            .with_port(6000)
            .with_overrides_from(|_| None)
            .unwrap();
        assert_eq!(config.port, 6000);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let err = EndpointConfig::new()
            .with_overrides_from(|var| (var == "SINGLESHOT_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "SINGLESHOT_PORT", .. }));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");
        fs::write(
            &path,
            r#"{ "port": 6000, "require_peer_certificate": false, "reply": "echo", "oversize": "truncate" }"#,
        )
        .unwrap();

        let config = EndpointConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 6000);
        assert!(!config.require_peer_certificate);
        assert_eq!(config.reply, Reply::Echo);
        assert_eq!(config.oversize, OversizePolicy::Truncate);
        assert_eq!(config.receive_capacity, DEFAULT_RECEIVE_CAPACITY);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");
        fs::write(&path, "{ port: ").unwrap();
        assert!(matches!(
            EndpointConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn echo_reply_returns_request() {
        assert_eq!(Reply::Echo.payload(b"Hello, server"), b"Hello, server");
        assert_eq!(
            Reply::default().payload(b"ignored"),
            DEFAULT_REPLY.as_bytes()
        );
    }
}

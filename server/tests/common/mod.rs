#![allow(dead_code)]

use std::{
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use singleshot_client::{ClientConfig, SecureClient};
use singleshot_common::{CertPaths, EndpointConfig};
use singleshot_server::SessionState;
use tempfile::TempDir;

/// A throwaway PKI: root CA, one intermediate, a server leaf and client
/// leaves issued directly by the root and through the intermediate.
pub struct TestPki {
    pub dir: TempDir,
}

struct Issuer {
    cert: Certificate,
    key:  KeyPair,
}

fn authority(common_name: &str, parent: Option<&Issuer>) -> Issuer {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = match parent {
        Some(parent) => params.signed_by(&key, &parent.cert, &parent.key).unwrap(),
        None => params.self_signed(&key).unwrap(),
    };
    Issuer { cert, key }
}

fn leaf(
    common_name: &str,
    sans: Vec<String>,
    usage: ExtendedKeyUsagePurpose,
    issuer: &Issuer,
) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(sans).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.extended_key_usages = vec![usage];
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    (cert, key)
}

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

impl TestPki {
    /// Layout inside the directory:
    ///
    /// - `root-ca.pem`
    /// - `server.pem` / `server.key.pem` (SAN localhost, issued by the root)
    /// - `client.pem` / `client.key.pem` (issued by the root)
    /// - `chained/client.pem` / `chained/client.key.pem` (leaf + intermediate)
    /// - `chained/root-ca.pem`
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();

        let root = authority("Test Root CA", None);
        let intermediate = authority("Test Intermediate CA", Some(&root));
        write(base, "root-ca.pem", &root.cert.pem());

        let (server, server_key) = leaf(
            "localhost",
            vec!["localhost".to_string()],
            ExtendedKeyUsagePurpose::ServerAuth,
            &root,
        );
        write(base, "server.pem", &server.pem());
        write(base, "server.key.pem", &server_key.serialize_pem());

        let (client, client_key) = leaf(
            "Test Client",
            Vec::new(),
            ExtendedKeyUsagePurpose::ClientAuth,
            &root,
        );
        write(base, "client.pem", &client.pem());
        write(base, "client.key.pem", &client_key.serialize_pem());

        let chained = base.join("chained");
        fs::create_dir(&chained).unwrap();
        let (deep, deep_key) = leaf(
            "Chained Client",
            Vec::new(),
            ExtendedKeyUsagePurpose::ClientAuth,
            &intermediate,
        );
        write(
            &chained,
            "client.pem",
            &format!("{}{}", deep.pem(), intermediate.cert.pem()),
        );
        write(&chained, "client.key.pem", &deep_key.serialize_pem());
        write(&chained, "root-ca.pem", &root.cert.pem());

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Endpoint on an ephemeral loopback port with short timeouts
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig::default()
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .with_certs(CertPaths::in_dir(self.path()))
            .with_io_timeout(Duration::from_secs(5))
            .with_close_linger(Duration::from_secs(2))
    }

    pub fn client(&self) -> SecureClient {
        self.client_with(ClientConfig::new())
    }

    pub fn anonymous_client(&self) -> SecureClient {
        self.client_with(ClientConfig::new().without_certificate())
    }

    /// Client presenting the leaf issued through the intermediate
    pub fn chained_client(&self) -> SecureClient {
        let config = ClientConfig::new()
            .with_cert_path(CertPaths::client_in_dir(self.path().join("chained")));
        SecureClient::new(config.with_timeout(Duration::from_secs(5))).unwrap()
    }

    fn client_with(&self, config: ClientConfig) -> SecureClient {
        let config = config
            .with_cert_path(CertPaths::client_in_dir(self.path()))
            .with_timeout(Duration::from_secs(5));
        SecureClient::new(config).unwrap()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

/// Collects every state an endpoint reports
#[derive(Clone, Default)]
pub struct StateLog(Arc<Mutex<Vec<SessionState>>>);

impl StateLog {
    pub fn recorder(&self) -> impl FnMut(SessionState) + Send + 'static {
        let log = Arc::clone(&self.0);
        move |state| log.lock().unwrap().push(state)
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.0.lock().unwrap().clone()
    }
}

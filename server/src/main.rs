use std::{
    net::IpAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use singleshot_common::{CertPaths, EndpointConfig, OversizePolicy, Reply};
use singleshot_server::Endpoint;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "singleshot-server")]
#[command(about = "Accepts one TLS connection, answers one message and exits")]
struct Args {
    /// Peer certificate verification: 0 disables, any other integer enables
    verify_client: Option<i64>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file, applied before environment and flags
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    bind: Option<IpAddr>,

    /// Directory holding server.pem, server.key.pem and root-ca.pem
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    #[arg(long)]
    cert: Option<PathBuf>,

    #[arg(long)]
    key: Option<PathBuf>,

    #[arg(long)]
    ca: Option<PathBuf>,

    #[arg(long)]
    max_chain_depth: Option<usize>,

    /// Fixed reply text
    #[arg(long, conflicts_with = "echo")]
    reply: Option<String>,

    /// Write the request back instead of a fixed reply
    #[arg(long)]
    echo: bool,

    /// Keep the first bytes of an oversized request instead of failing
    #[arg(long)]
    truncate: bool,

    #[arg(long)]
    io_timeout_secs: Option<u64>,

    #[arg(long)]
    accept_timeout_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<EndpointConfig> {
        let mut config = match &self.config {
            Some(path) => EndpointConfig::from_file(path)?,
            None => EndpointConfig::default(),
        }
        .with_env_overrides()?;

        if let Some(verify) = self.verify_client {
            info!("verify_client : {}", verify);
            config = config.with_peer_verification(verify != 0);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(addr) = self.bind {
            config = config.with_bind_addr(addr);
        }
        if let Some(dir) = self.certs_dir {
            config = config.with_certs(CertPaths::in_dir(dir));
        }
        if let Some(cert) = self.cert {
            config.certs.cert_path = cert;
        }
        if let Some(key) = self.key {
            config.certs.key_path = key;
        }
        if let Some(ca) = self.ca {
            config.certs.ca_path = Some(ca);
        }
        if let Some(depth) = self.max_chain_depth {
            config = config.with_max_chain_depth(depth);
        }
        if let Some(text) = self.reply {
            config = config.with_reply(Reply::Fixed(text));
        }
        if self.echo {
            config = config.with_reply(Reply::Echo);
        }
        if self.truncate {
            config = config.with_oversize(OversizePolicy::Truncate);
        }
        if let Some(secs) = self.io_timeout_secs {
            config = config.with_io_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.accept_timeout_secs {
            config = config.with_accept_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = args.into_config().context("Invalid configuration")?;
    info!("Starting singleshot server on {}", config.socket_addr());

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let endpoint = Endpoint::new(config).context("Failed to create endpoint")?;
    let report = endpoint
        .bind()
        .context("Failed to start listener")?
        .serve_until(&running)
        .context("Session failed")?;

    info!("SSL connection using {}", report.cipher_suite);
    match &report.peer_identity {
        Ok(Some(identity)) => {
            info!("Client certificate subject: {}", identity.subject);
            info!("Client certificate issuer: {}", identity.issuer);
        }
        Ok(None) => info!("The client does not have a certificate"),
        Err(e) => warn!("Client certificate could not be decoded: {}", e),
    }
    info!(
        "Received {} chars : '{}'",
        report.exchange.request.len(),
        String::from_utf8_lossy(&report.exchange.request)
    );
    if let Err(e) = &report.close {
        warn!("Shutdown incomplete: {}", e);
    }

    Ok(())
}

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use singleshot_client::{CertPaths, ClientConfig, SecureClient, DEFAULT_PORT};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "singleshot-client")]
#[command(about = "Sends one message to a singleshot TLS endpoint and prints the reply")]
struct Args {
    /// Message to send
    #[arg(default_value = "Hello, server")]
    message: String,

    #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    addr: String,

    /// Directory holding client.pem, client.key.pem and root-ca.pem
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    /// Do not present a client certificate
    #[arg(long)]
    no_cert: bool,

    #[arg(long, default_value = "localhost")]
    server_name: String,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = ClientConfig::new()
        .with_server_name(args.server_name)
        .with_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(dir) = args.certs_dir {
        config = config.with_cert_path(CertPaths::client_in_dir(dir));
    }
    if args.no_cert {
        config = config.without_certificate();
    }

    let client = SecureClient::new(config).context("Failed to create client")?;
    let reply = client
        .exchange(args.addr.as_str(), args.message.as_bytes())
        .context("Exchange with server failed")?;
    println!("{}", String::from_utf8_lossy(&reply));

    Ok(())
}

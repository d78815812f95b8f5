use anyhow::Result;
use singleshot_client::{ClientConfig, SecureClient, DEFAULT_PORT};

fn main() -> Result<()> {
    let addr = format!("127.0.0.1:{DEFAULT_PORT}");
    let client = SecureClient::new(ClientConfig::new())?;

    let mut connection = client.connect(addr.as_str())?;
    println!(
        "Connected to {} using {}",
        connection.peer_addr(),
        connection.cipher_suite().unwrap_or_else(|| "unknown".into())
    );

    connection.send(b"Hello, server")?;
    let reply = connection.read_reply()?;
    println!("Server replied: {}", String::from_utf8_lossy(&reply));

    connection.close()?;
    Ok(())
}

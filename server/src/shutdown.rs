use std::{
    io,
    net::{Shutdown, TcpStream},
    time::{Duration, Instant},
};

use rustls::ServerConnection;

use crate::error::ShutdownError;

/// What happened during an orderly close
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseOutcome {
    /// Our close-notify reached the socket
    pub close_notify_sent: bool,
    /// The peer answered with its own close-notify within the linger window
    pub peer_close_notify: bool,
}

/// Sends close-notify and waits up to `linger` for the peer's.
///
/// Only the TLS half of the close lives here; the caller releases the
/// socket and the connection state afterwards, whatever this returns.
pub(crate) fn close_secure(
    conn: &mut ServerConnection,
    stream: &mut TcpStream,
    linger: Duration,
) -> Result<CloseOutcome, ShutdownError> {
    tracing::debug!("Sending close-notify");
    conn.send_close_notify();
    while conn.wants_write() {
        conn.write_tls(stream).map_err(ShutdownError::CloseNotify)?;
    }

    let peer_close_notify = await_peer_close(conn, stream, linger);
    if peer_close_notify {
        tracing::debug!("Peer acknowledged close-notify");
    } else {
        tracing::debug!("Peer did not send close-notify within {:?}", linger);
    }

    Ok(CloseOutcome {
        close_notify_sent: true,
        peer_close_notify,
    })
}

fn await_peer_close(conn: &mut ServerConnection, stream: &mut TcpStream, linger: Duration) -> bool {
    match conn.process_new_packets() {
        Ok(state) if state.peer_has_closed() => return true,
        Ok(_) => {}
        Err(_) => return false,
    }
    if linger.is_zero() {
        return false;
    }

    let deadline = Instant::now().checked_add(linger);
    loop {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => linger,
        };
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            return false;
        }

        match conn.read_tls(stream) {
            Ok(0) => return false,
            Ok(_) => match conn.process_new_packets() {
                Ok(state) if state.peer_has_closed() => return true,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Ignoring TLS error while closing: {}", e);
                    return false;
                }
            },
            Err(e) => {
                tracing::debug!("Ignoring socket error while closing: {}", e);
                return false;
            }
        }
    }
}

/// Shuts down both directions and drops the socket. Errors are only logged:
/// the descriptor is released either way.
pub(crate) fn release_transport(stream: TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        if e.kind() != io::ErrorKind::NotConnected {
            tracing::debug!("Transport shutdown reported: {}", e);
        }
    }
    drop(stream);
}

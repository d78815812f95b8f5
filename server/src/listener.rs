use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::{error::TransportError, shutdown::release_transport};

/// How often a cancellable accept checks its flag
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A bound TCP endpoint that yields exactly one connection.
///
/// Accepting consumes the listener, so the listening socket is closed as
/// soon as the connection has been handed over.
#[derive(Debug)]
pub struct TransportListener {
    listener:   TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        tracing::info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until one connection arrives.
    pub fn accept(self) -> Result<RawChannel, TransportError> {
        let (stream, peer_addr) = self.listener.accept().map_err(TransportError::Accept)?;
        tracing::info!("Connection from {}", peer_addr);
        Ok(RawChannel::new(stream, peer_addr))
    }

    /// Waits for one connection while `running` stays true, giving up after
    /// `timeout` if one is set.
    pub fn accept_until(
        self,
        running: &AtomicBool,
        timeout: Option<Duration>,
    ) -> Result<RawChannel, TransportError> {
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let started = Instant::now();

        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    tracing::info!("Connection from {}", peer_addr);
                    // Some platforms let the accepted socket inherit O_NONBLOCK
                    stream
                        .set_nonblocking(false)
                        .map_err(TransportError::Socket)?;
                    return Ok(RawChannel::new(stream, peer_addr));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(limit) = timeout {
                        if started.elapsed() >= limit {
                            return Err(TransportError::AcceptTimedOut(limit));
                        }
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Accept(e)),
            }
        }

        tracing::info!("Accept cancelled");
        Err(TransportError::Cancelled)
    }
}

/// An accepted byte stream, not yet secured
#[derive(Debug)]
pub struct RawChannel {
    stream:    TcpStream,
    peer_addr: SocketAddr,
}

impl RawChannel {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { stream, peer_addr }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Applies a read/write timeout covering the rest of the session
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let timeout = timeout.filter(|t| !t.is_zero());
        self.stream
            .set_read_timeout(timeout)
            .map_err(TransportError::Socket)?;
        self.stream
            .set_write_timeout(timeout)
            .map_err(TransportError::Socket)?;
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (TcpStream, SocketAddr) {
        (self.stream, self.peer_addr)
    }

    /// Closes the channel without any TLS traffic
    pub fn release(self) {
        release_transport(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, sync::Arc};

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn accept_hands_over_one_connection() {
        let listener = TransportListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());

        let channel = listener.accept().unwrap();
        let client = client.join().unwrap();
        assert_eq!(channel.peer_addr(), client.local_addr().unwrap());

        // Listening socket is gone once accept returned
        assert!(TcpStream::connect(addr).is_err());
        channel.release();
    }

    #[test]
    fn binding_a_taken_port_fails() {
        let first = TransportListener::bind(loopback()).unwrap();
        let err = TransportListener::bind(first.local_addr()).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[test]
    fn accept_times_out() {
        let listener = TransportListener::bind(loopback()).unwrap();
        let running = AtomicBool::new(true);
        let err = listener
            .accept_until(&running, Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, TransportError::AcceptTimedOut(_)));
    }

    #[test]
    fn accept_can_be_cancelled() {
        let listener = TransportListener::bind(loopback()).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::SeqCst);
        });

        let err = listener.accept_until(&running, None).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[test]
    fn cancellable_accept_returns_blocking_channel() {
        let listener = TransportListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let running = AtomicBool::new(true);

        let channel = listener
            .accept_until(&running, Some(Duration::from_secs(5)))
            .unwrap();
        channel.set_io_timeout(Some(Duration::from_millis(200))).unwrap();
        drop(client.join().unwrap());
        channel.release();
    }
}

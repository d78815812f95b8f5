use std::io::{Read, Write};

use singleshot_common::{OversizePolicy, Reply};

use crate::{error::ExchangeError, session::SecureSession};

/// Result of the one request/reply round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub request:       Vec<u8>,
    /// The request did not fit and was cut to the receive capacity
    pub truncated:     bool,
    pub bytes_written: usize,
}

/// Performs exactly one bounded read followed by one write of the reply.
///
/// The read buffer holds one byte more than the receive capacity so an
/// oversized request can be told apart from one that fills the buffer
/// exactly.
pub fn exchange<S>(
    session: &mut S,
    capacity: usize,
    oversize: OversizePolicy,
    reply: &Reply,
) -> Result<Exchange, ExchangeError>
where
    S: Read + Write,
{
    let mut buf = vec![0u8; capacity.saturating_add(1)];
    let received = session.read(&mut buf).map_err(ExchangeError::from_read)?;
    if received == 0 {
        return Err(ExchangeError::PeerClosed);
    }

    let truncated = received > capacity;
    if truncated {
        match oversize {
            OversizePolicy::Reject => {
                tracing::warn!("Request exceeds {} bytes, rejecting", capacity);
                return Err(ExchangeError::Oversized { capacity });
            }
            OversizePolicy::Truncate => {
                tracing::warn!("Request exceeds {} bytes, truncating", capacity);
            }
        }
    }
    buf.truncate(received.min(capacity));
    tracing::info!(
        "Received {} bytes: '{}'",
        buf.len(),
        String::from_utf8_lossy(&buf)
    );

    let payload = reply.payload(&buf);
    session.write_all(payload).map_err(ExchangeError::from_write)?;
    session.flush().map_err(ExchangeError::from_write)?;
    tracing::debug!("Sent {} byte reply", payload.len());

    let bytes_written = payload.len();
    Ok(Exchange {
        request: buf,
        truncated,
        bytes_written,
    })
}

/// [`exchange`] using the limits fixed in the session's policy
pub fn exchange_session(
    session: &mut SecureSession,
    reply: &Reply,
) -> Result<Exchange, ExchangeError> {
    let policy = *session.policy();
    exchange(session, policy.receive_capacity(), policy.oversize(), reply)
}

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_MAX_CHAIN_DEPTH, DEFAULT_RECEIVE_CAPACITY};

/// What to do when the request does not fit in the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Fail the exchange
    #[default]
    Reject,
    /// Keep the first `receive_capacity` bytes and carry on
    Truncate,
}

/// Per-session rules, fixed at startup and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    require_peer_certificate: bool,
    max_chain_depth:          usize,
    receive_capacity:         usize,
    oversize:                 OversizePolicy,
}

impl SessionPolicy {
    pub fn new(require_peer_certificate: bool, max_chain_depth: usize) -> Self {
        Self {
            require_peer_certificate,
            max_chain_depth,
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            oversize: OversizePolicy::default(),
        }
    }

    /// Server-only authentication: no certificate request is sent
    pub fn server_auth_only() -> Self {
        Self::new(false, DEFAULT_MAX_CHAIN_DEPTH)
    }

    /// Mutual authentication with the default verification depth
    pub fn mutual() -> Self {
        Self::new(true, DEFAULT_MAX_CHAIN_DEPTH)
    }

    pub fn with_receive_capacity(mut self, capacity: usize) -> Self {
        self.receive_capacity = capacity;
        self
    }

    pub fn with_oversize(mut self, oversize: OversizePolicy) -> Self {
        self.oversize = oversize;
        self
    }

    pub fn require_peer_certificate(&self) -> bool {
        self.require_peer_certificate
    }

    /// Maximum number of intermediate authorities between the peer
    /// certificate and a trust anchor
    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    pub fn receive_capacity(&self) -> usize {
        self.receive_capacity
    }

    pub fn oversize(&self) -> OversizePolicy {
        self.oversize
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::mutual()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_keep_other_fields() {
        let policy = SessionPolicy::new(true, 3)
            .with_receive_capacity(16)
            .with_oversize(OversizePolicy::Truncate);
        assert!(policy.require_peer_certificate());
        assert_eq!(policy.max_chain_depth(), 3);
        assert_eq!(policy.receive_capacity(), 16);
        assert_eq!(policy.oversize(), OversizePolicy::Truncate);
    }

    #[test]
    fn server_auth_only_does_not_require_certificate() {
        let policy = SessionPolicy::server_auth_only();
        assert!(!policy.require_peer_certificate());
        assert_eq!(policy.oversize(), OversizePolicy::Reject);
    }
}

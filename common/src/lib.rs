//! Singleshot Common Library
//!
//! Shared building blocks for the singleshot TLS endpoint and its client:
//!
//! - Configuration structures, defaults and environment overrides
//! - The credential store (certificate chain + matching private key)
//! - Trusted authority bundles used to validate a peer chain
//! - The immutable per-session policy
//!
//! Everything here is loaded once, before any socket exists, and is
//! read-only afterwards.

/// Configuration structures and defaults
pub mod config;

/// Certificate, key and trust anchor loading
pub mod credentials;

/// Session policy
pub mod policy;

// Re-export commonly used types for convenience
pub use config::{
    check_receive_capacity, CertPaths, ConfigError, EndpointConfig, Reply,
    DEFAULT_MAX_CHAIN_DEPTH, DEFAULT_PORT, DEFAULT_REPLY, MAX_RECEIVE_CAPACITY,
};
pub use credentials::{Credential, CredentialError, TrustAnchor, TrustAnchorError};
pub use policy::{OversizePolicy, SessionPolicy};

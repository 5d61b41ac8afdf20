//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while building domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Relay address was empty after trimming
    #[error("Relay address is empty")]
    EmptyRelayAddress,

    /// Relay address carries a scheme other than http:// or socks5://
    #[error("Unsupported relay scheme in {address}: {scheme}")]
    UnsupportedScheme { address: String, scheme: String },

    /// Relay address could not be parsed into a host endpoint
    #[error("Invalid relay address {address}: {reason}")]
    InvalidRelayAddress { address: String, reason: String },

    /// User identifier was empty after trimming
    #[error("User identifier is empty")]
    EmptyUserId,
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

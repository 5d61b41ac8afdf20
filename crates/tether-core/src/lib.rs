//! tether core - shared domain types
//!
//! This crate provides the relay and membership types shared between
//! the wire protocol crate and the daemon.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod identity;
pub mod membership;
pub mod relay;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use identity::UserId;
pub use membership::{MembershipDiff, MembershipSet, ParsedMembership, RejectedLine};
pub use relay::{DeviceId, ProxyCredentials, ProxyEndpoint, RelayId, Scheme, DEFAULT_SOCKS_PORT};

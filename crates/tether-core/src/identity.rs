//! Caller-supplied user identity.

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier sent in every AUTH reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier, rejecting empty or whitespace-only input.
    pub fn new(id: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyUserId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Takes the identifier from the first line of a single-line config file.
    pub fn from_first_line(contents: &str) -> DomainResult<Self> {
        Self::new(contents.lines().next().unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

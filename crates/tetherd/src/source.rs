//! Where the desired relay membership comes from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use tether_core::MembershipSet;

/// Errors reading a membership snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The snapshot could not be read at all. Callers skip the reconcile.
    #[error("membership source unavailable ({location}): {reason}")]
    Unavailable { location: String, reason: String },
}

/// Produces the current desired membership on request.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn load_current(&self) -> Result<MembershipSet, SourceError>;
}

/// Relay list stored as a text file, one relay per line.
#[derive(Debug, Clone)]
pub struct FileMembershipSource {
    path: PathBuf,
}

impl FileMembershipSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MembershipSource for FileMembershipSource {
    async fn load_current(&self) -> Result<MembershipSet, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable {
                location: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let parsed = MembershipSet::parse(&contents);
        for rejected in &parsed.rejected {
            warn!(
                path = %self.path.display(),
                line = %rejected.line,
                error = %rejected.error,
                "Skipping invalid relay"
            );
        }

        if parsed.set.is_empty() {
            warn!(path = %self.path.display(), "Relay list is empty");
        } else {
            debug!(path = %self.path.display(), relays = parsed.set.len(), "Loaded relay list");
        }

        Ok(parsed.set)
    }
}

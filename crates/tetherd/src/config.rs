//! Daemon configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, `TETHER_*` environment variables, and command line
//! flags (applied by the binary).
//!
//! ```toml
//! relay_list = "/etc/tether/proxy.txt"
//! user_id_file = "/etc/tether/id.txt"
//! heartbeat_interval_secs = 20
//!
//! [backoff]
//! initial_secs = 5.0
//! multiplier = 2.0
//! max_secs = 60.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use tether_core::{DomainError, UserId};
use tether_protocol::DEFAULT_USER_AGENT;

use crate::worker::backoff::MAX_DELAY_SECS;
use crate::worker::{BackoffPolicy, WorkerSettings};

/// Upstream websocket endpoint every relay tunnels to.
pub const DEFAULT_ENDPOINT: &str = "wss://proxy.wynd.network:4650/";

pub const ENV_RELAYS: &str = "TETHER_RELAYS";
pub const ENV_USER_ID_FILE: &str = "TETHER_USER_ID_FILE";

/// Errors loading or validating configuration. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("user id file {path} has no user id on its first line")]
    InvalidUserId {
        path: PathBuf,
        #[source]
        source: DomainError,
    },

    #[error("relay list {0} does not exist")]
    MissingRelayList(PathBuf),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Relay list, one relay per line.
    pub relay_list: PathBuf,

    /// File whose first line is the user id.
    pub user_id_file: PathBuf,

    pub endpoint: String,

    pub user_agent: String,

    /// Skip certificate and hostname checks on the upstream TLS session.
    pub accept_invalid_certs: bool,

    pub heartbeat_interval_secs: u64,

    pub max_jitter_ms: u64,

    /// Quiet period after a relay list change before reloading.
    pub debounce_ms: u64,

    /// Grace period for a stopping worker before it is aborted.
    pub stop_timeout_ms: u64,

    pub backoff: BackoffPolicy,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            relay_list: PathBuf::from("proxy.txt"),
            user_id_file: PathBuf::from("id.txt"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: true,
            heartbeat_interval_secs: 20,
            max_jitter_ms: 1000,
            debounce_ms: 500,
            stop_timeout_ms: 5000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Reads a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `TETHER_RELAYS` and `TETHER_USER_ID_FILE` from the process
    /// environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, ignoring empty values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(relays) = non_empty(ENV_RELAYS) {
            self.relay_list = PathBuf::from(relays);
        }
        if let Some(user_id_file) = non_empty(ENV_USER_ID_FILE) {
            self.user_id_file = PathBuf::from(user_id_file);
        }
    }

    /// Makes relative file paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.relay_list.is_relative() {
            self.relay_list = base.join(&self.relay_list);
        }
        if self.user_id_file.is_relative() {
            self.user_id_file = base.join(&self.user_id_file);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        let backoff = &self.backoff;
        check_delay("backoff.initial_secs", backoff.initial_secs)?;
        check_delay("backoff.max_secs", backoff.max_secs)?;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff.multiplier",
                reason: format!("{} is below 1.0", backoff.multiplier),
            });
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Settings shared by every worker.
    pub fn worker_settings(&self, user_id: UserId) -> WorkerSettings {
        WorkerSettings {
            user_id,
            user_agent: self.user_agent.clone(),
            heartbeat_interval: self.heartbeat_interval(),
            max_jitter: self.max_jitter(),
            backoff: self.backoff.clone(),
        }
    }
}

/// A delay in seconds must be finite and within `[0, MAX_DELAY_SECS]`.
fn check_delay(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    if !secs.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&secs) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{secs} is not a delay between 0 and {MAX_DELAY_SECS} seconds"),
        });
    }
    Ok(())
}

/// Reads the user id from the first line of `path`.
pub fn load_user_id(path: &Path) -> Result<UserId, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    UserId::from_first_line(&contents).map_err(|source| ConfigError::InvalidUserId {
        path: path.to_path_buf(),
        source,
    })
}

/// Fails unless the relay list exists. Its contents are read later by the
/// membership source.
pub fn check_relay_list(path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingRelayList(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.relay_list, PathBuf::from("proxy.txt"));
        assert_eq!(config.user_id_file, PathBuf::from("id.txt"));
        assert_eq!(config.endpoint, "wss://proxy.wynd.network:4650/");
        assert!(config.accept_invalid_certs);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(20));
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(
            &path,
            "heartbeat_interval_secs = 30\n\n[backoff]\nmultiplier = 2.0\nmax_secs = 60.0\n",
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.backoff.initial_secs, 5.0);
        assert_eq!(config.backoff.multiplier, 2.0);
        assert_eq!(config.backoff.max_secs, 60.0);
        assert_eq!(config.relay_list, PathBuf::from("proxy.txt"));
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "heartbeat = 3\n").unwrap();

        assert!(matches!(
            DaemonConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_RELAYS, "/data/relays.txt"),
            (ENV_USER_ID_FILE, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = DaemonConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.relay_list, PathBuf::from("/data/relays.txt"));
        assert_eq!(config.user_id_file, PathBuf::from("id.txt"));
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = DaemonConfig {
            user_id_file: PathBuf::from("/abs/id.txt"),
            ..DaemonConfig::default()
        };
        config.resolve_paths(Path::new("/work"));
        assert_eq!(config.relay_list, PathBuf::from("/work/proxy.txt"));
        assert_eq!(config.user_id_file, PathBuf::from("/abs/id.txt"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DaemonConfig {
            heartbeat_interval_secs: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "heartbeat_interval_secs", .. })
        ));

        let mut config = DaemonConfig::default();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.backoff.max_secs = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "backoff.max_secs", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[backoff]\ninitial_secs = 1e20\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "backoff.initial_secs", .. })
        ));

        std::fs::write(&path, "[backoff]\nmultiplier = 2.0\nmax_secs = 1e300\n").unwrap();
        let config = DaemonConfig::load(&path).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "backoff.max_secs", .. })
        ));

        std::fs::write(&path, "[backoff]\ninitial_secs = 86400.0\nmax_secs = 86400.0\n").unwrap();
        assert!(DaemonConfig::load(&path).unwrap().validate().is_ok());
    }

    #[test]
    fn test_load_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.txt");

        std::fs::write(&path, "user-42\nignored\n").unwrap();
        assert_eq!(load_user_id(&path).unwrap().as_str(), "user-42");

        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            load_user_id(&path),
            Err(ConfigError::InvalidUserId { .. })
        ));

        assert!(matches!(
            load_user_id(&dir.path().join("missing.txt")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_check_relay_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.txt");
        assert!(matches!(
            check_relay_list(&path),
            Err(ConfigError::MissingRelayList(_))
        ));

        std::fs::write(&path, "").unwrap();
        assert!(check_relay_list(&path).is_ok());
    }
}

//! Daemon Configuration
//!
//! Settings are read from an optional YAML file; command-line flags override
//! individual values after loading.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default devd event socket
pub const DEFAULT_DEVD_SOCKET: &str = "/var/run/devd.pipe";

/// Default metrics bind address
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9477";

/// Device nodes examined during a system rescan
pub const DEFAULT_RESCAN_GLOBS: &[&str] =
    &["/dev/da*", "/dev/ada*", "/dev/nvd*", "/dev/nda*", "/dev/vtbd*"];

// =============================================================================
// Reconnect Configuration
// =============================================================================

/// Exponential backoff bounds for reconnecting to the event socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    pub initial_interval_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    pub max_interval_ms: u64,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

// =============================================================================
// Daemon Configuration
// =============================================================================

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// devd stream socket
    pub devd_socket: PathBuf,
    /// Metrics server bind address
    pub metrics_addr: String,
    /// Topology snapshot served by the snapshot backend
    pub snapshot_path: Option<PathBuf>,
    /// Glob patterns of device nodes visited by a system rescan
    pub rescan_globs: Vec<String>,
    /// Event socket reconnect policy
    pub reconnect: ReconnectConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            devd_socket: PathBuf::from(DEFAULT_DEVD_SOCKET),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
            snapshot_path: None,
            rescan_globs: DEFAULT_RESCAN_GLOBS.iter().map(|g| g.to_string()).collect(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Unable to read {}: {}", path.display(), e))
        })?;
        let config: DaemonConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be expressed in the type
    pub fn validate(&self) -> Result<()> {
        if self.rescan_globs.is_empty() {
            return Err(Error::Configuration("rescan_globs must not be empty".to_string()));
        }
        for pattern in &self.rescan_globs {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::Configuration(format!("Invalid rescan glob {}: {}", pattern, e))
            })?;
        }
        self.metrics_socket_addr()?;
        if self.reconnect.initial_interval_ms == 0 {
            return Err(Error::Configuration(
                "reconnect.initial_interval_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.max_interval_ms < self.reconnect.initial_interval_ms {
            return Err(Error::Configuration(
                "reconnect.max_interval_ms must not be below initial_interval_ms".to_string(),
            ));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(Error::Configuration(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn metrics_socket_addr(&self) -> Result<SocketAddr> {
        self.metrics_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid metrics address {}: {}", self.metrics_addr, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.devd_socket, PathBuf::from("/var/run/devd.pipe"));
        assert_eq!(config.rescan_globs.len(), 5);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metrics_addr: \"127.0.0.1:9999\"").unwrap();
        writeln!(file, "snapshot_path: /etc/vdevd/topology.yaml").unwrap();
        writeln!(file, "reconnect:").unwrap();
        writeln!(file, "  max_interval_ms: 5000").unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.metrics_addr, "127.0.0.1:9999");
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/etc/vdevd/topology.yaml")));
        assert_eq!(config.reconnect.max_interval(), Duration::from_secs(5));
        assert_eq!(config.reconnect.initial_interval_ms, 500);
        assert_eq!(config.devd_socket, PathBuf::from(DEFAULT_DEVD_SOCKET));
    }

    #[test]
    fn test_rejects_empty_globs() {
        let config = DaemonConfig {
            rescan_globs: Vec::new(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_bad_metrics_addr() {
        let config = DaemonConfig {
            metrics_addr: "not-an-address".to_string(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_zero_reconnect_interval() {
        let mut config = DaemonConfig::default();
        config.reconnect.initial_interval_ms = 0;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            DaemonConfig::load("/nonexistent/vdevd.yaml"),
            Err(Error::Configuration(_))
        );
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::Uri;

use crate::error::ConfigError;
use crate::monitor::NodeAddress;

pub const DEFAULT_FORMATION: &str = "default";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_MONITOR_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub uri: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Run without a monitor: only the local `fsm` commands are available.
    #[serde(default)]
    pub disabled: bool,
}

/// Shell commands used to drive the managed instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceHooks {
    pub init: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub status: Option<String>,
    pub promote: Option<String>,
    pub standby: Option<String>,
    pub detach: Option<String>,
    pub replication: Option<String>,
    pub sync_replication: Option<String>,
    pub maintenance: Option<String>,
    pub position: Option<String>,
    pub sync_state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub hooks: InstanceHooks,
}

/// Keeper configuration, read from a YAML file.
///
/// ```yaml
/// formation: default
/// group_id: 0
/// nodename: node-a.internal
/// port: 5432
/// pgdata: /var/lib/postgresql/16/main
/// monitor:
///   uri: http://monitor.internal:50051
///   timeout_ms: 5000
/// instance:
///   hooks:
///     start: pg_ctl -D "$AUTOKEEPER_PGDATA" start
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default = "default_formation")]
    pub formation: String,
    #[serde(default)]
    pub group_id: i32,
    pub nodename: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub pgdata: PathBuf,
    /// Defaults to the configuration file path with a `.state` extension.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub monitor: Option<MonitorConfig>,
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_formation() -> String {
    DEFAULT_FORMATION.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl KeeperConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        cfg.source = Some(path.to_path_buf());
        Ok(cfg)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            reason: e.to_string(),
        })
    }

    /// Read, complete and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_defaults(&mut self) {
        if self.state_file.is_none() {
            self.state_file = self
                .source
                .as_ref()
                .map(|source| source.with_extension("state"));
        }
        if let Some(monitor) = self.monitor.as_mut() {
            if monitor.timeout_ms.is_none() {
                monitor.timeout_ms = Some(DEFAULT_MONITOR_TIMEOUT_MS);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formation.trim().is_empty() {
            return Err(ConfigError::Invalid("formation must not be empty".into()));
        }
        if self.nodename.trim().is_empty() {
            return Err(ConfigError::Invalid("nodename must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".into()));
        }
        if self.pgdata.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("pgdata must not be empty".into()));
        }
        if self.state_file.is_none() {
            return Err(ConfigError::Invalid(
                "state_file is not set and cannot be derived".into(),
            ));
        }
        if let Some(monitor) = self.monitor.as_ref().filter(|m| !m.disabled) {
            let uri: Uri = monitor.uri.parse().map_err(|e| {
                ConfigError::Invalid(format!("monitor uri \"{}\": {}", monitor.uri, e))
            })?;
            match uri.scheme_str() {
                Some("http") | Some("https") => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "monitor uri \"{}\" must use http or https",
                        monitor.uri
                    )))
                }
            }
            if monitor.timeout_ms == Some(0) {
                return Err(ConfigError::Invalid("monitor timeout_ms must not be 0".into()));
            }
        }
        Ok(())
    }

    pub fn state_path(&self) -> Result<&Path, ConfigError> {
        self.state_file
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("state_file is not set".into()))
    }

    pub fn monitor_enabled(&self) -> bool {
        self.monitor.as_ref().map_or(false, |m| !m.disabled)
    }

    pub fn monitor_timeout(&self) -> Duration {
        let ms = self
            .monitor
            .as_ref()
            .and_then(|m| m.timeout_ms)
            .unwrap_or(DEFAULT_MONITOR_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn node_address(&self) -> NodeAddress {
        NodeAddress::new(self.nodename.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const MINIMAL: &str = "nodename: node-a\npgdata: /var/lib/pg\n";

    #[test]
    fn test_defaults_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keeper.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(format!("{}monitor:\n  uri: http://127.0.0.1:50051\n", MINIMAL).as_bytes())
            .unwrap();

        let cfg = KeeperConfig::load(&path).unwrap();
        assert_eq!(cfg.formation, "default");
        assert_eq!(cfg.group_id, 0);
        assert_eq!(cfg.port, 5432);
        assert_eq!(cfg.state_path().unwrap(), dir.path().join("keeper.state"));
        assert_eq!(cfg.monitor_timeout(), Duration::from_millis(5000));
        assert!(cfg.monitor_enabled());
        assert_eq!(cfg.node_address().to_string(), "node-a:5432");
    }

    #[test]
    fn test_missing_nodename_is_parse_error() {
        let err = KeeperConfig::from_yaml_str("pgdata: /var/lib/pg\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_monitor_uri() {
        let mut cfg = KeeperConfig::from_yaml_str(&format!(
            "{}state_file: /tmp/k.state\nmonitor:\n  uri: ftp://monitor\n",
            MINIMAL
        ))
        .unwrap();
        cfg.apply_defaults();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        cfg.monitor.as_mut().unwrap().disabled = true;
        assert!(cfg.validate().is_ok());
        assert!(!cfg.monitor_enabled());
    }

    #[test]
    fn test_hooks_section() {
        let cfg = KeeperConfig::from_yaml_str(&format!(
            "{}instance:\n  hooks:\n    start: pg_ctl start\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(cfg.instance.hooks.start.as_deref(), Some("pg_ctl start"));
        assert!(cfg.instance.hooks.stop.is_none());
        assert!(cfg.state_file.is_none());
    }

    #[test]
    fn test_unreadable_file() {
        let err = KeeperConfig::load(Path::new("/nonexistent/keeper.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

//! Configuration for the relay node.
//!
//! Config priority: explicit path > user (~/.config/dbrelay/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
  query::ConnectOption,
  replication::{NodeRole, ReplicationMode},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("IO error reading {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Node Configuration
// ============================================================================

/// Role and replication settings of this node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  pub role: NodeRole,
  pub replication_mode: ReplicationMode,
}

// ============================================================================
// Queue Configuration
// ============================================================================

/// Which end of the pending queue the next task is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOrder {
  /// Oldest pending task runs next
  #[default]
  Fifo,
  /// Newest pending task runs next (legacy ordering)
  Lifo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub dispatch_order: DispatchOrder,
  /// Run queued tasks to completion at teardown instead of dropping them
  pub drain_on_shutdown: bool,
  /// Capacity of the actor inbox
  pub inbox_capacity: usize,
  /// Capacity of the local event channel
  pub event_capacity: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      dispatch_order: DispatchOrder::Fifo,
      drain_on_shutdown: true,
      inbox_capacity: 256,
      event_capacity: 256,
    }
  }
}

// ============================================================================
// Connection / Transport / Logging
// ============================================================================

/// Options applied to every new connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
  pub options: Vec<ConnectOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  /// Unix socket used between peers and the authoritative node
  #[serde(skip_serializing_if = "Option::is_none")]
  pub socket_path: Option<PathBuf>,
}

impl TransportConfig {
  pub fn socket_path(&self) -> PathBuf {
    self.socket_path.clone().unwrap_or_else(crate::dirs::default_socket_path)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// off, error, warn, info, debug, trace
  pub level: String,
  /// daily, hourly, never
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub queue: QueueConfig,
  pub connection: ConnectionConfig,
  pub transport: TransportConfig,
  pub logging: LoggingConfig,
}

impl Config {
  /// Load config from an explicit file
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config from `path` if given, else the user config file, else defaults.
  ///
  /// A missing user config is not an error; a malformed one is.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = path {
      return Self::load_from(path);
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
    {
      debug!(path = %user_config_path.display(), "Loading user config");
      return Self::load_from(&user_config_path);
    }

    Ok(Self::default())
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    Some(crate::dirs::default_config_dir().join("config.toml"))
  }

  /// Render the current config as TOML (used for `--print-config`)
  pub fn to_toml(&self) -> String {
    toml::to_string_pretty(self).unwrap_or_default()
  }
}

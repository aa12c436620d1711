use serde::{Deserialize, Serialize};

/// Which side of the relay this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
  /// The node permitted to execute database work directly
  #[default]
  Authoritative,
  /// A node that may need to forward its queries to the authoritative node
  Peer,
}

impl NodeRole {
  pub fn is_authoritative(&self) -> bool {
    matches!(self, NodeRole::Authoritative)
  }
}

impl std::fmt::Display for NodeRole {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      NodeRole::Authoritative => write!(f, "AUTHORITATIVE"),
      NodeRole::Peer => write!(f, "PEER"),
    }
  }
}

/// Controls which node(s) may execute queries locally.
///
/// The value is owned by the authoritative node and pushed to peers by the
/// hosting application; every routing decision reads the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
  /// Only the authoritative node runs queries
  #[default]
  AuthoritativeOnly,
  /// Peers forward their queries to the authoritative node
  PeerToAuthoritative,
  /// Both sides run their own queries independently
  Broadcast,
}

impl std::fmt::Display for ReplicationMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ReplicationMode::AuthoritativeOnly => write!(f, "AuthoritativeOnly"),
      ReplicationMode::PeerToAuthoritative => write!(f, "PeerToAuthoritative"),
      ReplicationMode::Broadcast => write!(f, "Broadcast"),
    }
  }
}

/// Per-call override of where a query should run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
  /// Defer to the configured replication mode
  #[default]
  Default,
  ForceAuthoritative,
  ForcePeer,
}

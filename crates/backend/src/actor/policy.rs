//! Execution context policy
//!
//! Decides whether a call runs on this node, is forwarded to the
//! authoritative node, or is refused. The decision depends only on the
//! node's role, the current replication mode and the per-call context.

use crate::domain::replication::{ExecutionContext, NodeRole, ReplicationMode};

/// Outcome of [`authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
  RunLocally,
  ForwardToAuthoritative,
  Reject(String),
}

/// Routing failure reported to the caller before any work is queued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
  #[error("{0}")]
  Rejected(String),
  #[error("No RPC channel to the authoritative node")]
  NoChannel,
  #[error("Failed to reach the authoritative node: {0}")]
  Transport(String),
}

pub fn authorize(role: NodeRole, mode: ReplicationMode, context: ExecutionContext) -> Decision {
  use ExecutionContext::*;
  use ReplicationMode::*;

  match (role, context) {
    (NodeRole::Authoritative, Default | ForceAuthoritative) => Decision::RunLocally,
    (NodeRole::Authoritative, ForcePeer) => match mode {
      Broadcast => Decision::RunLocally,
      _ => Decision::Reject(format!(
        "ForcePeer queries cannot run on the authoritative node with ReplicationMode={mode}"
      )),
    },
    (NodeRole::Peer, _) => match (mode, context) {
      (AuthoritativeOnly, _) => Decision::Reject(format!("Cannot execute query in {role} with ReplicationMode={mode}")),
      (PeerToAuthoritative, Default | ForceAuthoritative) => Decision::ForwardToAuthoritative,
      (PeerToAuthoritative, ForcePeer) => Decision::RunLocally,
      (Broadcast, Default | ForcePeer) => Decision::RunLocally,
      (Broadcast, ForceAuthoritative) => Decision::Reject(
        "ForceAuthoritative queries can only run on the authoritative node or via PeerToAuthoritative mode".to_string(),
      ),
    },
  }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::query::{ConnectionId, NO_ID, PeerId, QueryId};

/// What a forwarded request is waiting on.
///
/// Query ids repeat across connections, so query keys always carry the
/// connection they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationKey {
  Query {
    connection_id: ConnectionId,
    query_id: QueryId,
  },
  /// A connection-open request, answered once the connect job finishes
  Connection(ConnectionId),
  /// No specific connection (`-1` on the wire)
  Unscoped,
}

impl CorrelationKey {
  /// Key for a pair of wire ids, where `-1` means "not set"
  pub fn from_ids(connection_id: ConnectionId, query_id: QueryId) -> Self {
    match (connection_id, query_id) {
      (NO_ID, _) => CorrelationKey::Unscoped,
      (id, NO_ID) => CorrelationKey::Connection(id),
      (connection_id, query_id) => CorrelationKey::Query { connection_id, query_id },
    }
  }
}

/// Remembers which requester each in-flight forwarded request belongs to.
#[derive(Debug)]
pub struct ClientRequestCorrelator<R = PeerId> {
  pending: HashMap<CorrelationKey, R>,
}

impl<R> Default for ClientRequestCorrelator<R> {
  fn default() -> Self {
    Self {
      pending: HashMap::new(),
    }
  }
}

impl<R: std::fmt::Debug> ClientRequestCorrelator<R> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Track `key` for `requester`. A key already in flight is replaced.
  pub fn track(&mut self, key: CorrelationKey, requester: R) {
    if let Some(previous) = self.pending.insert(key, requester) {
      warn!(?key, ?previous, "Correlation key was already in flight, replacing requester");
    }
  }

  /// Remove and return the requester for `key`
  pub fn resolve(&mut self, key: CorrelationKey) -> Option<R> {
    self.pending.remove(&key)
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}

use std::collections::HashMap;

use crate::domain::query::{ConnectionId, NO_ID, QueryId};

/// Per-connection query sequence numbers.
///
/// Counters are created lazily on the first `next` for a connection and hold
/// the value the following `next` will return.
#[derive(Debug, Default)]
pub struct QueryIdAllocator {
  counters: HashMap<ConnectionId, QueryId>,
}

impl QueryIdAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next(&mut self, connection_id: ConnectionId) -> QueryId {
    let counter = self.counters.entry(connection_id).or_insert(0);
    let id = *counter;
    *counter += 1;
    id
  }

  /// Next id to be issued, or `NO_ID` for an unknown connection
  pub fn peek(&self, connection_id: ConnectionId) -> QueryId {
    self.counters.get(&connection_id).copied().unwrap_or(NO_ID)
  }

  pub fn reset(&mut self, connection_id: ConnectionId) {
    if let Some(counter) = self.counters.get_mut(&connection_id) {
      *counter = 0;
    }
  }

  pub fn reset_all(&mut self) {
    self.counters.values_mut().for_each(|counter| *counter = 0);
  }

  pub fn remove(&mut self, connection_id: ConnectionId) {
    self.counters.remove(&connection_id);
  }

  pub fn clear(&mut self) {
    self.counters.clear();
  }
}

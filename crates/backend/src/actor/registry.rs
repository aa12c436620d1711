//! ConnectionRegistry - arena of open connections keyed by ConnectionId
//!
//! The registry is the only strong owner of a connection's driver. Jobs get a
//! `Weak` handle and re-check liveness when they run, so closing a connection
//! never has to wait for a job that has not started yet.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, Weak},
};

use tracing::{debug, warn};

use crate::{
  domain::query::{ConnectParams, ConnectionId},
  driver::{Driver, DriverFactory, SharedDriver},
};

/// A registered connection
pub struct Connection {
  pub params: ConnectParams,
  /// `None` for connections that live on the authoritative node
  driver: Option<SharedDriver>,
  /// Set while a job for this connection is on the worker pool
  pub busy: bool,
  /// Set from `create` until the connect job reports back. Queued work for
  /// the connection waits meanwhile.
  pub connecting: bool,
}

impl Connection {
  pub fn is_remote(&self) -> bool {
    self.driver.is_none()
  }

  /// Weak driver handle for a job. Remote connections have none.
  pub fn driver(&self) -> Option<Weak<Mutex<Box<dyn Driver>>>> {
    self.driver.as_ref().map(Arc::downgrade)
  }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("params", &self.params)
      .field("remote", &self.is_remote())
      .field("busy", &self.busy)
      .field("connecting", &self.connecting)
      .finish()
  }
}

pub struct ConnectionRegistry {
  factory: Arc<dyn DriverFactory>,
  connections: BTreeMap<ConnectionId, Connection>,
  next_id: ConnectionId,
  last_created: Option<ConnectionId>,
}

impl ConnectionRegistry {
  pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
    Self {
      factory,
      connections: BTreeMap::new(),
      next_id: 0,
      last_created: None,
    }
  }

  /// Allocate the next id and install an unconnected driver for it
  pub fn create(&mut self, params: ConnectParams) -> ConnectionId {
    let id = self.next_id;
    self.next_id += 1;
    self.last_created = Some(id);

    let driver: SharedDriver = Arc::new(Mutex::new(self.factory.create()));
    self.connections.insert(
      id,
      Connection {
        params,
        driver: Some(driver),
        busy: false,
        connecting: true,
      },
    );
    debug!(connection_id = id, "Connection created");
    id
  }

  /// Record a connection owned by the authoritative node.
  ///
  /// Remote entries carry no parameters; the authoritative node keeps those.
  pub fn install_remote(&mut self, id: ConnectionId) {
    if self.connections.contains_key(&id) {
      warn!(connection_id = id, "Remote connection replaces an existing entry");
    }
    self.connections.insert(
      id,
      Connection {
        params: ConnectParams::default(),
        driver: None,
        busy: false,
        connecting: false,
      },
    );
    self.next_id = self.next_id.max(id + 1);
  }

  /// Discard the most recently created entry so its id is handed out again.
  ///
  /// Only rewinds the counter when nothing newer has been created since.
  pub fn reset_last(&mut self, id: ConnectionId) -> bool {
    if self.last_created != Some(id) {
      return false;
    }
    self.connections.remove(&id);
    if self.next_id == id + 1 {
      self.next_id = id;
    }
    self.last_created = None;
    debug!(connection_id = id, "Last connection reset");
    true
  }

  pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
    self.connections.get(&id)
  }

  /// Mark a local connection busy and hand out its driver for a job
  pub fn checkout(&mut self, id: ConnectionId) -> Option<Weak<Mutex<Box<dyn Driver>>>> {
    let connection = self.connections.get_mut(&id)?;
    let driver = connection.driver()?;
    connection.busy = true;
    Some(driver)
  }

  /// Clear the busy flag set by `checkout`
  pub fn release(&mut self, id: ConnectionId) {
    if let Some(connection) = self.connections.get_mut(&id) {
      connection.busy = false;
    }
  }

  /// The connect job for `id` finished successfully
  pub fn mark_connected(&mut self, id: ConnectionId) {
    if let Some(connection) = self.connections.get_mut(&id) {
      connection.connecting = false;
    }
  }

  pub fn is_connecting(&self, id: ConnectionId) -> bool {
    self.connections.get(&id).is_some_and(|c| c.connecting)
  }

  pub fn contains(&self, id: ConnectionId) -> bool {
    self.connections.contains_key(&id)
  }

  pub fn ids(&self) -> Vec<ConnectionId> {
    self.connections.keys().copied().collect()
  }

  /// Disconnect and remove. Returns false for unknown ids.
  pub fn close(&mut self, id: ConnectionId) -> bool {
    let Some(connection) = self.connections.remove(&id) else {
      return false;
    };
    if self.last_created == Some(id) {
      self.last_created = None;
    }

    if let Some(driver) = connection.driver {
      let mut guard = match driver.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
      };
      guard.close();
    }
    debug!(connection_id = id, "Connection closed");
    true
  }

  /// Close every connection, returning the ids that were closed
  pub fn close_all(&mut self) -> Vec<ConnectionId> {
    let ids = self.ids();
    for id in &ids {
      self.close(*id);
    }
    ids
  }
}

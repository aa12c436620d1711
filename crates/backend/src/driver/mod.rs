//! Database drivers
//!
//! A [`Driver`] is the blocking, per-connection client the relay hands work
//! to. Drivers are always called from the blocking pool, never from the
//! actor loop, so implementations are free to block on I/O.

mod sqlite;

use std::{
  path::Path,
  sync::{Arc, Mutex},
};

pub use sqlite::SqliteDriver;

use crate::domain::query::{ConnectParams, ResultSet};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
  #[error("Not connected")]
  NotConnected,
  #[error("Connect failed: {0}")]
  Connect(String),
  #[error("Query failed: {0}")]
  Query(String),
  #[error("Image transfer failed: {0}")]
  Image(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("Driver lock poisoned")]
  Poisoned,
}

// ============================================================================
// Driver trait
// ============================================================================

/// Blocking client for one database connection.
pub trait Driver: Send {
  /// Open the connection. Reconnecting an open driver replaces the old session.
  fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError>;

  /// Disconnect. Closing a driver that is not connected is a no-op.
  fn close(&mut self);

  /// Run one update statement (or a batch the engine accepts as one unit)
  fn exec_update(&mut self, sql: &str) -> Result<(), DriverError>;

  fn exec_select(&mut self, sql: &str) -> Result<ResultSet, DriverError>;

  /// Bind the bytes of `image_path` into `sql` and execute it.
  ///
  /// The image is bound at the parameter named `column` when the statement
  /// has one, otherwise at positional parameter `param_id`.
  fn write_image(&mut self, sql: &str, column: &str, param_id: i32, image_path: &Path) -> Result<(), DriverError>;

  /// Read the image bytes from the first column of the first row of `sql`
  fn read_image(&mut self, sql: &str) -> Result<Vec<u8>, DriverError>;
}

/// A driver shared between the registry (owner) and in-flight jobs
pub type SharedDriver = Arc<Mutex<Box<dyn Driver>>>;

/// Creates a fresh, unconnected driver for every new connection.
pub trait DriverFactory: Send + Sync {
  fn create(&self) -> Box<dyn Driver>;
}

impl<F> DriverFactory for F
where
  F: Fn() -> Box<dyn Driver> + Send + Sync,
{
  fn create(&self) -> Box<dyn Driver> {
    self()
  }
}

/// Factory producing [`SqliteDriver`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteFactory;

impl DriverFactory for SqliteFactory {
  fn create(&self) -> Box<dyn Driver> {
    Box::new(SqliteDriver::default())
  }
}

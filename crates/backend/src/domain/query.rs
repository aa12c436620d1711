//! Query, connection and result types shared across the relay.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Dense, count-allocated connection identifier. `-1` is the wire sentinel
/// for "no specific connection".
pub type ConnectionId = i32;

/// Per-connection query sequence number. `-1` marks a result that never
/// reached the queue (e.g. a rejected request).
pub type QueryId = i32;

/// Sentinel used on the wire and in events for "no id".
pub const NO_ID: i32 = -1;

/// Identifies a requesting node on the authoritative side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "peer-{}", self.0)
  }
}

// ============================================================================
// Connection parameters
// ============================================================================

/// Driver-specific key/value option applied at connect time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOption {
  pub key: String,
  pub value: String,
}

/// Parameters for opening a connection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectParams {
  pub server: String,
  pub database: String,
  pub user: String,
  pub password: String,
  pub port: u16,
  #[serde(default)]
  pub options: Vec<ConnectOption>,
}

impl ConnectParams {
  pub fn new(
    server: impl Into<String>,
    database: impl Into<String>,
    user: impl Into<String>,
    password: impl Into<String>,
    port: u16,
  ) -> Self {
    Self {
      server: server.into(),
      database: database.into(),
      user: user.into(),
      password: password.into(),
      port,
      options: Vec::new(),
    }
  }

  pub fn with_options(mut self, options: Vec<ConnectOption>) -> Self {
    self.options = options;
    self
  }
}

// Keep the password out of logs
impl std::fmt::Debug for ConnectParams {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectParams")
      .field("server", &self.server)
      .field("database", &self.database)
      .field("user", &self.user)
      .field("password", &"***")
      .field("port", &self.port)
      .field("options", &self.options)
      .finish()
  }
}

// ============================================================================
// Results
// ============================================================================

/// A single cell returned by a select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl std::fmt::Display for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Null => write!(f, "NULL"),
      Value::Integer(v) => write!(f, "{v}"),
      Value::Real(v) => write!(f, "{v}"),
      Value::Text(v) => write!(f, "{v}"),
      Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
    }
  }
}

/// Rows returned by a select, addressable by row or by column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
  pub columns: Vec<String>,
  pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Column-major view: column name -> values in row order
  pub fn by_column(&self) -> BTreeMap<&str, Vec<&Value>> {
    let mut out: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for (idx, name) in self.columns.iter().enumerate() {
      let values = self.rows.iter().filter_map(|row| row.get(idx)).collect();
      out.insert(name.as_str(), values);
    }
    out
  }
}

// ============================================================================
// Query payloads
// ============================================================================

/// The closed set of operations a query task can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
  Update,
  Select,
  ImageUpdate,
  ImageSelect,
  Close,
  EndPlay,
}

/// Payload of a query task. Dispatched with a single `match` by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPayload {
  /// One or more statements executed in order
  Update { statements: Vec<String> },
  Select { sql: String },
  /// Bind the bytes of `image_path` into `sql` at the parameter named
  /// `column` (or at index `param_id` if the name is not found)
  ImageUpdate {
    sql: String,
    column: String,
    param_id: i32,
    image_path: PathBuf,
  },
  ImageSelect { sql: String },
  Close,
  EndPlay,
}

impl QueryPayload {
  pub fn kind(&self) -> QueryKind {
    match self {
      QueryPayload::Update { .. } => QueryKind::Update,
      QueryPayload::Select { .. } => QueryKind::Select,
      QueryPayload::ImageUpdate { .. } => QueryKind::ImageUpdate,
      QueryPayload::ImageSelect { .. } => QueryKind::ImageSelect,
      QueryPayload::Close => QueryKind::Close,
      QueryPayload::EndPlay => QueryKind::EndPlay,
    }
  }
}

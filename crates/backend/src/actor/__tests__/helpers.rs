//! Test helpers for actor tests.
//!
//! Provides a scriptable [`MockFactory`]/[`MockDriver`] pair, a
//! [`RecordingChannel`] that captures RPC traffic, and small helpers for
//! spawning actors and waiting on their events.

use std::{
  collections::HashSet,
  path::Path,
  sync::{Arc, Mutex, MutexGuard},
  time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    connection::{DbActorConfig, DbConnectionActor},
    handle::DbHandle,
    message::DbEvent,
  },
  domain::{
    query::{ConnectParams, PeerId, ResultSet, Value},
    replication::{NodeRole, ReplicationMode},
  },
  driver::{Driver, DriverError, DriverFactory},
  ipc::{QueryRequest, RemoteReply, RemoteRpcChannel, RpcError},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Mock driver
// ============================================================================

/// Counters shared by every driver a [`MockFactory`] creates
#[derive(Debug, Clone, Default)]
pub struct MockStats {
  pub connects: usize,
  pub closes: usize,
  /// Every statement handed to a query operation, in execution order
  pub executed: Vec<String>,
  /// Highest number of driver operations (connects included) running at
  /// the same time
  pub max_active: usize,
  /// Query operations that reached a driver before its connect finished
  pub unconnected_runs: usize,
}

#[derive(Debug, Default)]
struct MockState {
  latency: Duration,
  connect_latency: Duration,
  fail_on: HashSet<String>,
  panic_on: HashSet<String>,
  fail_connect: bool,
  active: usize,
  stats: MockStats,
}

#[derive(Clone, Default)]
pub struct MockFactory {
  state: Arc<Mutex<MockState>>,
}

impl MockFactory {
  pub fn with_latency(latency: Duration) -> Self {
    let factory = Self::default();
    factory.lock().latency = latency;
    factory
  }

  /// Every connect sleeps for `latency` before succeeding or failing
  pub fn with_connect_latency(self, latency: Duration) -> Self {
    self.lock().connect_latency = latency;
    self
  }

  fn lock(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Statements equal to `sql` fail
  pub fn fail_on(&self, sql: &str) {
    self.lock().fail_on.insert(sql.to_string());
  }

  /// Statements equal to `sql` panic inside the driver
  pub fn panic_on(&self, sql: &str) {
    self.lock().panic_on.insert(sql.to_string());
  }

  pub fn fail_connect(&self, fail: bool) {
    self.lock().fail_connect = fail;
  }

  pub fn stats(&self) -> MockStats {
    self.lock().stats.clone()
  }

  pub fn driver(&self) -> MockDriver {
    MockDriver {
      state: Arc::clone(&self.state),
      connected: false,
    }
  }
}

impl DriverFactory for MockFactory {
  fn create(&self) -> Box<dyn Driver> {
    Box::new(self.driver())
  }
}

/// Driver that records what it was asked to do.
///
/// Queries succeed without a prior `connect` but are counted in
/// `unconnected_runs`. Select returns one row holding the statement text and
/// read_image returns the statement bytes.
pub struct MockDriver {
  state: Arc<Mutex<MockState>>,
  connected: bool,
}

impl MockDriver {
  fn lock(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn run(&self, sql: &str) -> Result<(), DriverError> {
    let (latency, fail, panic) = {
      let mut state = self.lock();
      state.active += 1;
      state.stats.max_active = state.stats.max_active.max(state.active);
      state.stats.executed.push(sql.to_string());
      if !self.connected {
        state.stats.unconnected_runs += 1;
      }
      (state.latency, state.fail_on.contains(sql), state.panic_on.contains(sql))
    };

    if !latency.is_zero() {
      std::thread::sleep(latency);
    }
    self.lock().active -= 1;

    if panic {
      panic!("mock driver told to panic on {sql}");
    }
    if fail {
      return Err(DriverError::Query(format!("mock failure: {sql}")));
    }
    Ok(())
  }
}

impl Driver for MockDriver {
  fn connect(&mut self, _params: &ConnectParams) -> Result<(), DriverError> {
    let (latency, fail) = {
      let mut state = self.lock();
      state.stats.connects += 1;
      state.active += 1;
      state.stats.max_active = state.stats.max_active.max(state.active);
      (state.connect_latency, state.fail_connect)
    };

    if !latency.is_zero() {
      std::thread::sleep(latency);
    }
    self.lock().active -= 1;

    if fail {
      return Err(DriverError::Connect("mock refused connection".to_string()));
    }
    self.connected = true;
    Ok(())
  }

  fn close(&mut self) {
    self.connected = false;
    self.lock().stats.closes += 1;
  }

  fn exec_update(&mut self, sql: &str) -> Result<(), DriverError> {
    self.run(sql)
  }

  fn exec_select(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
    self.run(sql)?;
    Ok(ResultSet {
      columns: vec!["sql".to_string()],
      rows: vec![vec![Value::Text(sql.to_string())]],
    })
  }

  fn write_image(&mut self, sql: &str, _column: &str, _param_id: i32, image_path: &Path) -> Result<(), DriverError> {
    self.run(sql)?;
    std::fs::metadata(image_path)?;
    Ok(())
  }

  fn read_image(&mut self, sql: &str) -> Result<Vec<u8>, DriverError> {
    self.run(sql)?;
    Ok(sql.as_bytes().to_vec())
  }
}

// ============================================================================
// Recording RPC channel
// ============================================================================

/// Captures requests and replies instead of sending them anywhere
#[derive(Default)]
pub struct RecordingChannel {
  requests: Mutex<Vec<QueryRequest>>,
  replies: Mutex<Vec<(PeerId, RemoteReply)>>,
  fail: bool,
}

impl RecordingChannel {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn failing() -> Arc<Self> {
    Arc::new(Self {
      fail: true,
      ..Self::default()
    })
  }

  pub fn requests(&self) -> Vec<QueryRequest> {
    self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn replies(&self) -> Vec<(PeerId, RemoteReply)> {
    self.replies.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

#[async_trait]
impl RemoteRpcChannel for RecordingChannel {
  async fn send_request(&self, request: QueryRequest) -> Result<(), RpcError> {
    if self.fail {
      return Err(RpcError::Connection("link down".to_string()));
    }
    self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);
    Ok(())
  }

  async fn send_reply(&self, peer: PeerId, reply: RemoteReply) -> Result<(), RpcError> {
    if self.fail {
      return Err(RpcError::Connection("link down".to_string()));
    }
    self.replies.lock().unwrap_or_else(|e| e.into_inner()).push((peer, reply));
    Ok(())
  }
}

// ============================================================================
// Actor helpers
// ============================================================================

pub struct TestActor {
  pub handle: DbHandle,
  pub events: mpsc::Receiver<DbEvent>,
  pub cancel: CancellationToken,
}

pub fn config(role: NodeRole, mode: ReplicationMode) -> DbActorConfig {
  DbActorConfig {
    role,
    replication_mode: mode,
    ..DbActorConfig::default()
  }
}

pub fn spawn_actor(
  config: DbActorConfig,
  factory: Arc<dyn DriverFactory>,
  rpc: Option<Arc<dyn RemoteRpcChannel>>,
) -> TestActor {
  let cancel = CancellationToken::new();
  let (handle, events) = DbConnectionActor::spawn(config, factory, rpc, cancel.clone());
  TestActor { handle, events, cancel }
}

/// Authoritative node in AuthoritativeOnly mode with no RPC channel
pub fn spawn_authoritative(factory: &MockFactory) -> TestActor {
  spawn_actor(
    config(NodeRole::Authoritative, ReplicationMode::AuthoritativeOnly),
    Arc::new(factory.clone()),
    None,
  )
}

pub fn params(database: &str) -> ConnectParams {
  ConnectParams::new("localhost", database, "user", "secret", 5432)
}

pub async fn next_event(events: &mut mpsc::Receiver<DbEvent>) -> DbEvent {
  match tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await {
    Ok(Some(event)) => event,
    Ok(None) => panic!("event channel closed"),
    Err(_) => panic!("timed out waiting for an event"),
  }
}

pub async fn collect_events(events: &mut mpsc::Receiver<DbEvent>, count: usize) -> Vec<DbEvent> {
  let mut out = Vec::with_capacity(count);
  for _ in 0..count {
    out.push(next_event(events).await);
  }
  out
}

/// Assert nothing else is emitted for a short while
pub async fn assert_quiet(events: &mut mpsc::Receiver<DbEvent>) {
  if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
    panic!("unexpected event: {event:?}");
  }
}

/// Poll `check` until it returns true or the timeout elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if check().await {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  false
}

/// Open a connection and wait until it reports success
pub async fn connect(actor: &mut TestActor, database: &str) -> i32 {
  let dispatch = actor.handle.create_connection(params(database)).await.expect("create connection");
  let crate::actor::message::Dispatch::Connecting(id) = dispatch else {
    panic!("expected Connecting, got {dispatch:?}");
  };
  match next_event(&mut actor.events).await {
    DbEvent::ConnectionStateChanged { ok: true, connection_id, .. } => assert_eq!(connection_id, id),
    other => panic!("expected successful connect, got {other:?}"),
  }
  id
}

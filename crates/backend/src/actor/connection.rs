//! DbConnectionActor - owns the connections of one node and runs their queries
//!
//! The actor is the only code that touches its registry, query ids, task
//! queue and correlator. Callers talk to it through a [`DbHandle`], workers
//! post completions on a channel the actor owns, and results leave as
//! [`DbEvent`]s (plus an RPC reply when a peer asked for the work).
//!
//! Queued work for a connection waits until its connect job has reported
//! back, so a driver never runs a query before it is connected.
//!
//! # Routing
//!
//! Every caller request is checked with [`policy::authorize`] against the
//! node's role and current replication mode:
//!
//! - run locally: queued and executed here
//! - forward: encoded with [`protocol`] and sent over the RPC channel
//! - reject: refused synchronously, with a failed event carrying query id `-1`
//!
//! # Teardown
//!
//! On shutdown (or cancellation, or when every handle is dropped) the actor
//! stops taking caller requests, runs or drops what is still queued depending
//! on `queue.drain_on_shutdown`, waits for every in-flight job, and finally
//! closes all connections.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
  correlator::{ClientRequestCorrelator, CorrelationKey},
  executor::{INVALID_CONNECTION, Job, TaskExecutor, Ticket},
  handle::DbHandle,
  message::{ActorMessage, Completion, DbEvent, Dispatch, JobResult},
  policy::{self, Decision, RoutingError},
  query_id::QueryIdAllocator,
  queue::{Origin, QueryTask, QueryTaskQueue},
  registry::ConnectionRegistry,
};
use crate::{
  domain::{
    config::{Config, QueueConfig},
    query::{ConnectOption, ConnectParams, ConnectionId, NO_ID, PeerId, QueryKind, QueryPayload},
    replication::{ExecutionContext, NodeRole, ReplicationMode},
  },
  driver::DriverFactory,
  ipc::{
    QueryRequest, RemoteReply, RemoteRpcChannel,
    protocol::{self, RequestedOperation},
  },
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DbActorConfig {
  pub role: NodeRole,
  pub replication_mode: ReplicationMode,
  pub queue: QueueConfig,
  /// Applied to connections whose parameters carry no options
  pub connect_options: Vec<ConnectOption>,
}

impl From<&Config> for DbActorConfig {
  fn from(config: &Config) -> Self {
    Self {
      role: config.node.role,
      replication_mode: config.node.replication_mode,
      queue: config.queue.clone(),
      connect_options: config.connection.options.clone(),
    }
  }
}

// ============================================================================
// Actor
// ============================================================================

pub struct DbConnectionActor {
  role: NodeRole,
  mode: ReplicationMode,
  drain_on_shutdown: bool,
  connect_options: Vec<ConnectOption>,

  registry: ConnectionRegistry,
  query_ids: QueryIdAllocator,
  queue: QueryTaskQueue,
  correlator: ClientRequestCorrelator<PeerId>,
  executor: TaskExecutor,
  completions: mpsc::UnboundedReceiver<Completion>,

  rpc: Option<Arc<dyn RemoteRpcChannel>>,
  inbox: mpsc::Receiver<ActorMessage>,
  events: mpsc::Sender<DbEvent>,
  cancel: CancellationToken,
  shutdown_acks: Vec<oneshot::Sender<()>>,
}

impl DbConnectionActor {
  /// Spawn the actor, returning a handle to it and the receiver for its events.
  pub fn spawn(
    config: DbActorConfig,
    factory: Arc<dyn DriverFactory>,
    rpc: Option<Arc<dyn RemoteRpcChannel>>,
    cancel: CancellationToken,
  ) -> (DbHandle, mpsc::Receiver<DbEvent>) {
    let (tx, inbox) = mpsc::channel(config.queue.inbox_capacity.max(1));
    let (events, events_rx) = mpsc::channel(config.queue.event_capacity.max(1));
    let (completion_tx, completions) = mpsc::unbounded_channel();

    let actor = Self {
      role: config.role,
      mode: config.replication_mode,
      drain_on_shutdown: config.queue.drain_on_shutdown,
      connect_options: config.connect_options,
      registry: ConnectionRegistry::new(factory),
      query_ids: QueryIdAllocator::new(),
      queue: QueryTaskQueue::new(config.queue.dispatch_order),
      correlator: ClientRequestCorrelator::new(),
      executor: TaskExecutor::new(completion_tx),
      completions,
      rpc,
      inbox,
      events,
      cancel,
      shutdown_acks: Vec::new(),
    };

    tokio::spawn(actor.run());
    (DbHandle::new(tx), events_rx)
  }

  async fn run(mut self) {
    info!(role = %self.role, mode = %self.mode, "Connection actor started");

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("Connection actor cancelled");
          break;
        }

        Some(completion) = self.completions.recv() => self.handle_completion(completion).await,

        msg = self.inbox.recv() => {
          match msg {
            Some(ActorMessage::Shutdown { done }) => {
              self.shutdown_acks.push(done);
              break;
            }
            Some(msg) => self.handle_message(msg).await,
            None => {
              debug!("All handles dropped");
              break;
            }
          }
        }
      }
    }

    self.teardown().await;
  }

  async fn handle_message(&mut self, msg: ActorMessage) {
    match msg {
      ActorMessage::CreateConnection { params, reply } => {
        let result = self.create_connection(params).await;
        let _ = reply.send(result);
      }
      ActorMessage::Query {
        connection_id,
        payload,
        context,
        reply,
      } => {
        let result = self.submit(connection_id, payload, context).await;
        let _ = reply.send(result);
        self.pump().await;
      }
      ActorMessage::Close { connection_id } => self.close(connection_id).await,
      ActorMessage::CloseAll => self.close_all().await,
      ActorMessage::PeekQueryId { connection_id, reply } => {
        let _ = reply.send(self.query_ids.peek(connection_id));
      }
      ActorMessage::IsQueryRunning { connection_id, reply } => {
        let busy = self.registry.get(connection_id).is_some_and(|c| c.busy);
        let _ = reply.send(busy);
      }
      ActorMessage::Connections { reply } => {
        let _ = reply.send(self.registry.ids());
      }
      ActorMessage::SetReplicationMode(mode) => {
        if mode != self.mode {
          info!(from = %self.mode, to = %mode, "Replication mode changed");
          self.mode = mode;
          self.emit(DbEvent::ReplicationModeChanged { mode }).await;
        }
      }
      ActorMessage::RemoteRequest { peer, request } => self.handle_remote_request(peer, request).await,
      ActorMessage::RemoteReply(reply) => self.handle_remote_reply(reply).await,
      ActorMessage::Shutdown { done } => self.shutdown_acks.push(done),
    }
  }

  // ==========================================================================
  // Caller requests
  // ==========================================================================

  async fn create_connection(&mut self, params: ConnectParams) -> Result<Dispatch, RoutingError> {
    let result = match policy::authorize(self.role, self.mode, ExecutionContext::Default) {
      Decision::RunLocally => Ok(Dispatch::Connecting(self.open_connection(params, Origin::Local))),
      Decision::ForwardToAuthoritative => self.forward(vec![protocol::create_connection(&params)]).await,
      Decision::Reject(reason) => Err(RoutingError::Rejected(reason)),
    };

    if let Err(e) = &result {
      warn!(error = %e, "Create connection refused");
      self.emit(DbEvent::connection_failed(NO_ID, e.to_string())).await;
    }
    result
  }

  async fn submit(
    &mut self,
    connection_id: ConnectionId,
    payload: QueryPayload,
    context: ExecutionContext,
  ) -> Result<Dispatch, RoutingError> {
    let kind = payload.kind();
    let result = match policy::authorize(self.role, self.mode, context) {
      Decision::RunLocally => Ok(self.enqueue(connection_id, payload, Origin::Local)),
      Decision::ForwardToAuthoritative => {
        self
          .forward(protocol::encode_payload(connection_id, &payload))
          .await
      }
      Decision::Reject(reason) => Err(RoutingError::Rejected(reason)),
    };

    if let Err(e) = &result {
      warn!(connection_id, ?kind, ?context, error = %e, "Query refused");
      if let Some(event) = DbEvent::rejected(kind, connection_id, e.to_string()) {
        self.emit(event).await;
      }
    }
    result
  }

  async fn close(&mut self, connection_id: ConnectionId) {
    match policy::authorize(self.role, self.mode, ExecutionContext::Default) {
      Decision::RunLocally => {
        self.enqueue_close(connection_id, Origin::Local);
        self.pump().await;
      }
      Decision::ForwardToAuthoritative => {
        if !self.registry.close(connection_id) {
          debug!(connection_id, "Close on unknown connection ignored");
          return;
        }
        self.query_ids.remove(connection_id);
        if let Err(e) = self.forward(vec![protocol::close_connection(connection_id)]).await {
          warn!(connection_id, error = %e, "Failed to forward close");
        }
      }
      Decision::Reject(reason) => warn!(connection_id, %reason, "Close refused"),
    }
  }

  async fn close_all(&mut self) {
    match policy::authorize(self.role, self.mode, ExecutionContext::Default) {
      Decision::RunLocally => {
        self.enqueue_close_all(Origin::Local);
        self.pump().await;
      }
      Decision::ForwardToAuthoritative => {
        self.registry.close_all();
        self.query_ids.clear();
        if let Err(e) = self.forward(vec![protocol::close_all()]).await {
          warn!(error = %e, "Failed to forward close all");
        }
      }
      Decision::Reject(reason) => warn!(%reason, "Close all refused"),
    }
  }

  /// Send requests to the authoritative node, in order
  async fn forward(&self, requests: Vec<QueryRequest>) -> Result<Dispatch, RoutingError> {
    let Some(rpc) = &self.rpc else {
      return Err(RoutingError::NoChannel);
    };
    for request in requests {
      trace!(connection_id = request.connection_id, query = %request.query, "Forwarding request");
      rpc
        .send_request(request)
        .await
        .map_err(|e| RoutingError::Transport(e.to_string()))?;
    }
    Ok(Dispatch::Forwarded)
  }

  // ==========================================================================
  // Local work
  // ==========================================================================

  /// Register a connection and start its connect job
  fn open_connection(&mut self, mut params: ConnectParams, origin: Origin) -> ConnectionId {
    if params.options.is_empty() {
      params.options = self.connect_options.clone();
    }

    let id = self.registry.create(params.clone());
    if let Origin::Remote(peer) = origin {
      self.correlator.track(CorrelationKey::Connection(id), peer);
    }
    info!(connection_id = id, database = %params.database, ?origin, "Opening connection");

    match self.registry.checkout(id) {
      Some(driver) => {
        let ticket = Ticket {
          connection_id: id,
          query_id: NO_ID,
          origin,
        };
        self.executor.execute(ticket, driver, Job::Connect(params));
      }
      None => {
        warn!(connection_id = id, "New connection has no driver");
        self.registry.mark_connected(id);
      }
    }
    id
  }

  fn enqueue(&mut self, connection_id: ConnectionId, payload: QueryPayload, origin: Origin) -> Dispatch {
    let query_id = self.query_ids.next(connection_id);
    if let Origin::Remote(peer) = origin {
      self.correlator.track(
        CorrelationKey::Query {
          connection_id,
          query_id,
        },
        peer,
      );
    }

    trace!(connection_id, query_id, kind = ?payload.kind(), "Task queued");
    self.queue.enqueue(QueryTask {
      connection_id,
      query_id,
      payload,
      origin,
    });
    Dispatch::Queued {
      connection_id,
      query_id,
    }
  }

  fn enqueue_close(&mut self, connection_id: ConnectionId, origin: Origin) {
    if !self.registry.contains(connection_id) {
      debug!(connection_id, "Close on unknown connection ignored");
      return;
    }
    self.queue.enqueue(QueryTask {
      connection_id,
      query_id: NO_ID,
      payload: QueryPayload::Close,
      origin,
    });
  }

  fn enqueue_close_all(&mut self, origin: Origin) {
    self.queue.enqueue(QueryTask {
      connection_id: NO_ID,
      query_id: NO_ID,
      payload: QueryPayload::EndPlay,
      origin,
    });
  }

  /// Start queued tasks until one is running on the executor, the queue is
  /// empty, or the next task belongs to a connection that is still
  /// connecting. Close and EndPlay finish inline.
  async fn pump(&mut self) {
    loop {
      if let Some(next) = self.queue.peek_next()
        && self.registry.is_connecting(next.connection_id)
      {
        trace!(connection_id = next.connection_id, "Next task waits for connect");
        break;
      }
      let Some(task) = self.queue.start_next() else {
        break;
      };
      if self.dispatch(task).await {
        break;
      }
      self.finish_task();
    }
  }

  fn finish_task(&mut self) {
    if self.queue.complete() {
      trace!("Queue idle, resetting query ids");
      self.query_ids.reset_all();
    }
  }

  /// Run one task. Returns true if it went to the executor.
  async fn dispatch(&mut self, task: QueryTask) -> bool {
    let kind = task.kind();
    let QueryTask {
      connection_id,
      query_id,
      payload,
      origin,
    } = task;

    let Some(job) = Job::from_payload(payload) else {
      match kind {
        QueryKind::Close => {
          if self.registry.close(connection_id) {
            self.query_ids.remove(connection_id);
            info!(connection_id, "Connection closed");
          }
        }
        _ => {
          let closed = self.registry.close_all();
          self.query_ids.clear();
          info!(count = closed.len(), "All connections closed");
        }
      }
      return false;
    };

    let driver = match self.registry.get(connection_id) {
      None => Err(INVALID_CONNECTION.to_string()),
      Some(conn) if conn.is_remote() => Err(format!(
        "Connection {connection_id} is owned by the authoritative node"
      )),
      Some(_) => self
        .registry
        .checkout(connection_id)
        .ok_or_else(|| INVALID_CONNECTION.to_string()),
    };

    match driver {
      Ok(driver) => {
        let ticket = Ticket {
          connection_id,
          query_id,
          origin,
        };
        self.executor.execute(ticket, driver, job);
        true
      }
      Err(error) => {
        warn!(connection_id, query_id, ?kind, %error, "Dropping task");
        if !self.registry.contains(connection_id) {
          self.query_ids.remove(connection_id);
        }
        if let Some(event) = DbEvent::query_failed(kind, connection_id, query_id, error) {
          self
            .deliver(event, CorrelationKey::from_ids(connection_id, query_id), origin)
            .await;
        }
        false
      }
    }
  }

  async fn handle_completion(&mut self, completion: Completion) {
    self.executor.reap();

    let connection_id = completion.connection_id;
    let query_id = completion.query_id;
    let origin = completion.origin;
    let occupies_queue = completion.occupies_queue();
    self.registry.release(connection_id);

    match &completion.result {
      JobResult::Connected(Ok(())) => {
        self.registry.mark_connected(connection_id);
        info!(connection_id, "Connection established");
      }
      JobResult::Connected(Err(error)) => {
        warn!(connection_id, %error, "Connect failed");
        if !self.registry.reset_last(connection_id) {
          self.registry.close(connection_id);
        }
      }
      result => debug!(connection_id, query_id, ok = result.is_ok(), "Query finished"),
    }

    let key = CorrelationKey::from_ids(connection_id, query_id);
    self.deliver(DbEvent::from(completion), key, origin).await;

    if occupies_queue {
      self.finish_task();
    }
    // A finished connect may unblock the head of the queue
    self.pump().await;
  }

  // ==========================================================================
  // RPC
  // ==========================================================================

  /// A peer forwarded a request to this node
  async fn handle_remote_request(&mut self, peer: PeerId, request: QueryRequest) {
    if !self.role.is_authoritative() {
      warn!(%peer, query = %request.query, "Peer node received a forwarded request, ignoring");
      return;
    }
    if self.mode != ReplicationMode::PeerToAuthoritative {
      let reason = format!("Cannot execute forwarded query with ReplicationMode={}", self.mode);
      self.refuse_remote(peer, &request, reason).await;
      return;
    }

    let origin = Origin::Remote(peer);
    match protocol::classify(&request) {
      Err(e) => self.refuse_remote(peer, &request, e.to_string()).await,
      Ok(RequestedOperation::CreateConnection(params)) => {
        self.open_connection(params, origin);
      }
      Ok(RequestedOperation::CloseConnection(connection_id)) => {
        self.enqueue_close(connection_id, origin);
        self.pump().await;
      }
      Ok(RequestedOperation::CloseAll) => {
        self.enqueue_close_all(origin);
        self.pump().await;
      }
      Ok(RequestedOperation::Query { connection_id, payload }) => {
        if !self.registry.contains(connection_id) {
          self.refuse_remote(peer, &request, INVALID_CONNECTION.to_string()).await;
          return;
        }
        self.enqueue(connection_id, payload, origin);
        self.pump().await;
      }
    }
  }

  /// Answer a forwarded request that will not run
  async fn refuse_remote(&self, peer: PeerId, request: &QueryRequest, reason: String) {
    warn!(%peer, query = %request.query, %reason, "Refusing forwarded request");

    let event = if protocol::is_create_connection(request) {
      Some(DbEvent::connection_failed(NO_ID, reason))
    } else if request.query == protocol::CLOSE_CONNECTION || request.query == protocol::CLOSE_ALL_CONNECTIONS {
      None
    } else {
      DbEvent::rejected(protocol::request_kind(request), request.connection_id, reason)
    };

    if let Some(reply) = event.as_ref().and_then(RemoteReply::from_event) {
      self.reply_to(peer, reply).await;
    }
  }

  /// The authoritative node answered a request this node forwarded
  async fn handle_remote_reply(&mut self, reply: RemoteReply) {
    if let RemoteReply::ConnectionStatus {
      ok: true,
      connection_id,
      ..
    } = &reply
    {
      self.registry.install_remote(*connection_id);
    }
    self.emit(DbEvent::from(reply)).await;
  }

  async fn reply_to(&self, peer: PeerId, reply: RemoteReply) {
    let Some(rpc) = &self.rpc else {
      warn!(%peer, "No RPC channel, dropping reply");
      return;
    };
    if let Err(e) = rpc.send_reply(peer, reply).await {
      warn!(%peer, error = %e, "Failed to send reply");
    }
  }

  // ==========================================================================
  // Delivery
  // ==========================================================================

  /// Fire the local event, and send the result back if a peer is waiting on it
  async fn deliver(&mut self, event: DbEvent, key: CorrelationKey, origin: Origin) {
    match (self.correlator.resolve(key), origin) {
      (Some(requester), _) => {
        if let Some(reply) = RemoteReply::from_event(&event) {
          self.reply_to(requester, reply).await;
        }
      }
      (None, Origin::Remote(peer)) => warn!(?key, %peer, "No requester tracked for remote task, reply dropped"),
      (None, Origin::Local) => {}
    }
    self.emit(event).await;
  }

  async fn emit(&self, event: DbEvent) {
    if self.events.send(event).await.is_err() {
      trace!("Event receiver dropped");
    }
  }

  // ==========================================================================
  // Teardown
  // ==========================================================================

  async fn teardown(&mut self) {
    if !self.drain_on_shutdown {
      let dropped = self.queue.drain();
      if !dropped.is_empty() {
        warn!(count = dropped.len(), "Dropping queued tasks at shutdown");
      }
    }
    self.pump().await;

    loop {
      while let Ok(completion) = self.completions.try_recv() {
        self.handle_completion(completion).await;
      }
      if self.queue.is_idle() && self.executor.in_flight() == 0 {
        break;
      }
      // The inbox may already be closed; completions arrive regardless
      tokio::select! {
        Some(completion) = self.completions.recv() => self.handle_completion(completion).await,
        Some(msg) = self.inbox.recv() => self.handle_shutdown_message(msg).await,
        Some(()) = self.executor.join_next() => {}
        else => break,
      }
    }
    while let Ok(msg) = self.inbox.try_recv() {
      self.handle_shutdown_message(msg).await;
    }

    let closed = self.registry.close_all();
    self.query_ids.clear();
    if !self.correlator.is_empty() {
      warn!(pending = self.correlator.len(), "Forwarded requests left unanswered");
    }
    info!(closed = closed.len(), "Connection actor stopped");

    for ack in self.shutdown_acks.drain(..) {
      let _ = ack.send(());
    }
  }

  /// Only replies and shutdown requests are processed from the inbox once
  /// teardown starts. Dropping a caller's reply sender reports the actor as
  /// gone.
  async fn handle_shutdown_message(&mut self, msg: ActorMessage) {
    match msg {
      ActorMessage::RemoteReply(reply) => self.handle_remote_reply(reply).await,
      ActorMessage::Shutdown { done } => self.shutdown_acks.push(done),
      ActorMessage::RemoteRequest { peer, request } => {
        self
          .refuse_remote(peer, &request, "Authoritative node is shutting down".to_string())
          .await
      }
      other => debug!(?other, "Ignoring message during shutdown"),
    }
  }
}

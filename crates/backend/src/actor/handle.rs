//! Handle for communicating with a [`DbConnectionActor`](super::connection::DbConnectionActor)
//!
//! Handles are cheap to clone. Query methods only wait until the actor has
//! accepted (or refused) the request; results arrive later as
//! [`DbEvent`](super::message::DbEvent)s.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use super::{
  message::{ActorMessage, Dispatch},
  policy::RoutingError,
};
use crate::{
  domain::{
    query::{ConnectParams, ConnectionId, PeerId, QueryId, QueryPayload},
    replication::{ExecutionContext, ReplicationMode},
  },
  ipc::{QueryRequest, RemoteReply},
};

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
  #[error("Actor has shut down")]
  ActorGone,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
  #[error(transparent)]
  Routing(#[from] RoutingError),
  #[error(transparent)]
  Send(#[from] SendError),
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone, Debug)]
pub struct DbHandle {
  tx: mpsc::Sender<ActorMessage>,
}

impl DbHandle {
  pub fn new(tx: mpsc::Sender<ActorMessage>) -> Self {
    Self { tx }
  }

  async fn send(&self, msg: ActorMessage) -> Result<(), SendError> {
    self.tx.send(msg).await.map_err(|_| SendError::ActorGone)
  }

  async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ActorMessage) -> Result<T, SendError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self.send(build(reply_tx)).await?;
    reply_rx.await.map_err(|_| SendError::ActorGone)
  }

  async fn dispatch(
    &self,
    build: impl FnOnce(oneshot::Sender<Result<Dispatch, RoutingError>>) -> ActorMessage,
  ) -> Result<Dispatch, RequestError> {
    Ok(self.ask(build).await??)
  }

  // --------------------------------------------------------------------------
  // Connection lifecycle
  // --------------------------------------------------------------------------

  /// Open a connection. The outcome arrives as `ConnectionStateChanged`.
  pub async fn create_connection(&self, params: ConnectParams) -> Result<Dispatch, RequestError> {
    self
      .dispatch(|reply| ActorMessage::CreateConnection { params, reply })
      .await
  }

  /// Close one connection. Unknown ids are ignored.
  pub async fn close(&self, connection_id: ConnectionId) -> Result<(), SendError> {
    self.send(ActorMessage::Close { connection_id }).await
  }

  pub async fn close_all(&self) -> Result<(), SendError> {
    self.send(ActorMessage::CloseAll).await
  }

  // --------------------------------------------------------------------------
  // Queries
  // --------------------------------------------------------------------------

  pub async fn query(
    &self,
    connection_id: ConnectionId,
    payload: QueryPayload,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    self
      .dispatch(|reply| ActorMessage::Query {
        connection_id,
        payload,
        context,
        reply,
      })
      .await
  }

  pub async fn update(
    &self,
    connection_id: ConnectionId,
    sql: impl Into<String>,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    self.update_many(connection_id, vec![sql.into()], context).await
  }

  /// Run several statements as one task, stopping at the first failure
  pub async fn update_many(
    &self,
    connection_id: ConnectionId,
    statements: Vec<String>,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    self
      .query(connection_id, QueryPayload::Update { statements }, context)
      .await
  }

  pub async fn select(
    &self,
    connection_id: ConnectionId,
    sql: impl Into<String>,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    self
      .query(connection_id, QueryPayload::Select { sql: sql.into() }, context)
      .await
  }

  pub async fn update_image(
    &self,
    connection_id: ConnectionId,
    sql: impl Into<String>,
    column: impl Into<String>,
    param_id: i32,
    image_path: impl Into<PathBuf>,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    let payload = QueryPayload::ImageUpdate {
      sql: sql.into(),
      column: column.into(),
      param_id,
      image_path: image_path.into(),
    };
    self.query(connection_id, payload, context).await
  }

  pub async fn select_image(
    &self,
    connection_id: ConnectionId,
    sql: impl Into<String>,
    context: ExecutionContext,
  ) -> Result<Dispatch, RequestError> {
    self
      .query(connection_id, QueryPayload::ImageSelect { sql: sql.into() }, context)
      .await
  }

  // --------------------------------------------------------------------------
  // State
  // --------------------------------------------------------------------------

  /// Next query id for `connection_id`, or `-1` if it has never issued one
  pub async fn peek_query_id(&self, connection_id: ConnectionId) -> Result<QueryId, SendError> {
    self
      .ask(|reply| ActorMessage::PeekQueryId { connection_id, reply })
      .await
  }

  pub async fn is_query_running(&self, connection_id: ConnectionId) -> Result<bool, SendError> {
    self
      .ask(|reply| ActorMessage::IsQueryRunning { connection_id, reply })
      .await
  }

  pub async fn connections(&self) -> Result<Vec<ConnectionId>, SendError> {
    self.ask(|reply| ActorMessage::Connections { reply }).await
  }

  pub async fn set_replication_mode(&self, mode: ReplicationMode) -> Result<(), SendError> {
    self.send(ActorMessage::SetReplicationMode(mode)).await
  }

  // --------------------------------------------------------------------------
  // RPC entry points
  // --------------------------------------------------------------------------

  /// Deliver a request forwarded by `peer`
  pub async fn remote_request(&self, peer: PeerId, request: QueryRequest) -> Result<(), SendError> {
    self.send(ActorMessage::RemoteRequest { peer, request }).await
  }

  /// Deliver a reply from the authoritative node
  pub async fn remote_reply(&self, reply: RemoteReply) -> Result<(), SendError> {
    self.send(ActorMessage::RemoteReply(reply)).await
  }

  /// Tear the actor down, waiting until in-flight work has finished and
  /// every connection is closed.
  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.ask(|done| ActorMessage::Shutdown { done }).await
  }
}

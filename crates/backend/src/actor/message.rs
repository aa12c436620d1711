//! Message types for the connection actor
//!
//! [`ActorMessage`] is everything that can arrive in the actor inbox: caller
//! requests from a [`DbHandle`](super::handle::DbHandle) and traffic from the
//! RPC layer. Executor results arrive separately as [`Completion`]s.
//! [`DbEvent`] is what the actor reports to the hosting application.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{policy::RoutingError, queue::Origin};
use crate::{
  domain::{
    query::{ConnectParams, ConnectionId, NO_ID, PeerId, QueryId, QueryKind, QueryPayload, ResultSet},
    replication::{ExecutionContext, ReplicationMode},
  },
  ipc::{QueryRequest, RemoteReply},
};

// ============================================================================
// Inbox
// ============================================================================

/// How the actor accepted a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
  /// A connect job is running for this new connection
  Connecting(ConnectionId),
  /// Queued locally under this query id
  Queued {
    connection_id: ConnectionId,
    query_id: QueryId,
  },
  /// Sent to the authoritative node; the result arrives as an event
  Forwarded,
}

pub type DispatchReply = oneshot::Sender<Result<Dispatch, RoutingError>>;

#[derive(Debug)]
pub enum ActorMessage {
  CreateConnection {
    params: ConnectParams,
    reply: DispatchReply,
  },
  Query {
    connection_id: ConnectionId,
    payload: QueryPayload,
    context: ExecutionContext,
    reply: DispatchReply,
  },
  Close {
    connection_id: ConnectionId,
  },
  CloseAll,
  PeekQueryId {
    connection_id: ConnectionId,
    reply: oneshot::Sender<QueryId>,
  },
  IsQueryRunning {
    connection_id: ConnectionId,
    reply: oneshot::Sender<bool>,
  },
  Connections {
    reply: oneshot::Sender<Vec<ConnectionId>>,
  },
  SetReplicationMode(ReplicationMode),
  /// A peer forwarded a request to this (authoritative) node
  RemoteRequest {
    peer: PeerId,
    request: QueryRequest,
  },
  /// The authoritative node answered a request this peer forwarded
  RemoteReply(RemoteReply),
  /// Tear down and acknowledge once every connection is closed
  Shutdown {
    done: oneshot::Sender<()>,
  },
}

// ============================================================================
// Completions
// ============================================================================

/// Result of one executor job, by operation
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
  Connected(Result<(), String>),
  Updated(Result<(), String>),
  Selected(Result<ResultSet, String>),
  ImageWritten(Result<(), String>),
  ImageRead(Result<Vec<u8>, String>),
}

impl JobResult {
  pub fn is_ok(&self) -> bool {
    match self {
      JobResult::Connected(r) | JobResult::Updated(r) | JobResult::ImageWritten(r) => r.is_ok(),
      JobResult::Selected(r) => r.is_ok(),
      JobResult::ImageRead(r) => r.is_ok(),
    }
  }
}

/// Posted to the actor's completion channel when a job finishes
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
  pub connection_id: ConnectionId,
  /// `NO_ID` for connect jobs
  pub query_id: QueryId,
  pub origin: Origin,
  pub result: JobResult,
}

impl Completion {
  /// Connect jobs run beside the queue; everything else occupies it
  pub fn occupies_queue(&self) -> bool {
    !matches!(self.result, JobResult::Connected(_))
  }
}

// ============================================================================
// Events
// ============================================================================

fn split_error(result: Result<(), String>) -> (bool, String) {
  match result {
    Ok(()) => (true, String::new()),
    Err(e) => (false, e),
  }
}

/// Notification delivered to the hosting application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum DbEvent {
  ConnectionStateChanged {
    ok: bool,
    connection_id: ConnectionId,
    error: String,
  },
  QueryUpdateStatusChanged {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
  },
  QuerySelectStatusChanged {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
    result: ResultSet,
  },
  ImageUpdateStatusChanged {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
  },
  ImageSelectStatusChanged {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
    image: Vec<u8>,
  },
  ReplicationModeChanged {
    mode: ReplicationMode,
  },
}

impl DbEvent {
  pub fn is_ok(&self) -> bool {
    match self {
      DbEvent::ConnectionStateChanged { ok, .. }
      | DbEvent::QueryUpdateStatusChanged { ok, .. }
      | DbEvent::QuerySelectStatusChanged { ok, .. }
      | DbEvent::ImageUpdateStatusChanged { ok, .. }
      | DbEvent::ImageSelectStatusChanged { ok, .. } => *ok,
      DbEvent::ReplicationModeChanged { .. } => true,
    }
  }

  pub fn connection_failed(connection_id: ConnectionId, error: impl Into<String>) -> Self {
    DbEvent::ConnectionStateChanged {
      ok: false,
      connection_id,
      error: error.into(),
    }
  }

  /// Failure event for a query of `kind` that never produced a result.
  ///
  /// Close and EndPlay have no event of their own.
  pub fn query_failed(
    kind: QueryKind,
    connection_id: ConnectionId,
    query_id: QueryId,
    error: impl Into<String>,
  ) -> Option<Self> {
    let error = error.into();
    let event = match kind {
      QueryKind::Update => DbEvent::QueryUpdateStatusChanged {
        connection_id,
        query_id,
        ok: false,
        error,
      },
      QueryKind::Select => DbEvent::QuerySelectStatusChanged {
        connection_id,
        query_id,
        ok: false,
        error,
        result: ResultSet::default(),
      },
      QueryKind::ImageUpdate => DbEvent::ImageUpdateStatusChanged {
        connection_id,
        query_id,
        ok: false,
        error,
      },
      QueryKind::ImageSelect => DbEvent::ImageSelectStatusChanged {
        connection_id,
        query_id,
        ok: false,
        error,
        image: Vec::new(),
      },
      QueryKind::Close | QueryKind::EndPlay => return None,
    };
    Some(event)
  }

  /// Event for a rejected request. Rejected queries never got an id.
  pub fn rejected(kind: QueryKind, connection_id: ConnectionId, reason: impl Into<String>) -> Option<Self> {
    Self::query_failed(kind, connection_id, NO_ID, reason)
  }
}

impl From<Completion> for DbEvent {
  fn from(completion: Completion) -> Self {
    let Completion {
      connection_id,
      query_id,
      result,
      ..
    } = completion;

    match result {
      JobResult::Connected(r) => {
        let (ok, error) = split_error(r);
        DbEvent::ConnectionStateChanged {
          ok,
          connection_id,
          error,
        }
      }
      JobResult::Updated(r) => {
        let (ok, error) = split_error(r);
        DbEvent::QueryUpdateStatusChanged {
          connection_id,
          query_id,
          ok,
          error,
        }
      }
      JobResult::Selected(r) => {
        let (ok, error, result) = match r {
          Ok(rs) => (true, String::new(), rs),
          Err(e) => (false, e, ResultSet::default()),
        };
        DbEvent::QuerySelectStatusChanged {
          connection_id,
          query_id,
          ok,
          error,
          result,
        }
      }
      JobResult::ImageWritten(r) => {
        let (ok, error) = split_error(r);
        DbEvent::ImageUpdateStatusChanged {
          connection_id,
          query_id,
          ok,
          error,
        }
      }
      JobResult::ImageRead(r) => {
        let (ok, error, image) = match r {
          Ok(bytes) => (true, String::new(), bytes),
          Err(e) => (false, e, Vec::new()),
        };
        DbEvent::ImageSelectStatusChanged {
          connection_id,
          query_id,
          ok,
          error,
          image,
        }
      }
    }
  }
}

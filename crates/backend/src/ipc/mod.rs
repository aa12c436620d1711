//! IPC module - the wire types exchanged between peer and authoritative nodes
//! and the [`RemoteRpcChannel`] trait the actor sends them through.
//!
//! Two channels ship with the crate:
//! - [`loopback::PeerDirectory`] connects actors living in one process
//! - [`client::RpcClient`] / [`crate::server::RpcServer`] speak JSON lines over a Unix socket
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
  actor::message::DbEvent,
  domain::query::{ConnectionId, PeerId, QueryId, ResultSet},
};

pub mod client;
pub mod loopback;
pub mod protocol;

pub use client::RpcClient;
pub use loopback::PeerDirectory;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
  #[error("IO error: {0}")]
  Io(String),
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("Connection error: {0}")]
  Connection(String),
  #[error("Unknown peer: {0}")]
  UnknownPeer(PeerId),
}

impl From<serde_json::Error> for RpcError {
  fn from(err: serde_json::Error) -> Self {
    RpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for RpcError {
  fn from(err: std::io::Error) -> Self {
    RpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for RpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    RpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Requests (peer -> authoritative)
// ============================================================================

/// A query forwarded by a peer.
///
/// `query` is either SQL or one of the lifecycle sentinels understood by
/// [`protocol::classify`].
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
  pub connection_id: ConnectionId,
  pub query: String,
  #[serde(default)]
  pub is_select: bool,
  #[serde(default)]
  pub is_image: bool,
  /// Column / parameter name for image updates
  pub update_param: Option<String>,
  pub param_id: Option<i32>,
  pub image_path: Option<PathBuf>,
}

impl QueryRequest {
  pub fn sql(connection_id: ConnectionId, query: impl Into<String>, is_select: bool) -> Self {
    Self {
      connection_id,
      query: query.into(),
      is_select,
      is_image: false,
      update_param: None,
      param_id: None,
      image_path: None,
    }
  }
}

// ============================================================================
// Replies (authoritative -> peer)
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reply")]
pub enum RemoteReply {
  ConnectionStatus {
    ok: bool,
    connection_id: ConnectionId,
    error: String,
  },
  QueryResult {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
    is_select: bool,
    result: Option<ResultSet>,
  },
  ImageResult {
    connection_id: ConnectionId,
    query_id: QueryId,
    ok: bool,
    error: String,
    is_select: bool,
    image: Option<Vec<u8>>,
  },
}

impl RemoteReply {
  /// Reply carrying the same outcome as a local event
  pub fn from_event(event: &DbEvent) -> Option<Self> {
    let reply = match event.clone() {
      DbEvent::ConnectionStateChanged {
        ok,
        connection_id,
        error,
      } => RemoteReply::ConnectionStatus {
        ok,
        connection_id,
        error,
      },
      DbEvent::QueryUpdateStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
      } => RemoteReply::QueryResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: false,
        result: None,
      },
      DbEvent::QuerySelectStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
        result,
      } => RemoteReply::QueryResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: true,
        result: Some(result),
      },
      DbEvent::ImageUpdateStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
      } => RemoteReply::ImageResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: false,
        image: None,
      },
      DbEvent::ImageSelectStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
        image,
      } => RemoteReply::ImageResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: true,
        image: Some(image),
      },
      DbEvent::ReplicationModeChanged { .. } => return None,
    };
    Some(reply)
  }
}

impl From<RemoteReply> for DbEvent {
  fn from(reply: RemoteReply) -> Self {
    match reply {
      RemoteReply::ConnectionStatus {
        ok,
        connection_id,
        error,
      } => DbEvent::ConnectionStateChanged {
        ok,
        connection_id,
        error,
      },
      RemoteReply::QueryResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: true,
        result,
      } => DbEvent::QuerySelectStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
        result: result.unwrap_or_default(),
      },
      RemoteReply::QueryResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: false,
        ..
      } => DbEvent::QueryUpdateStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
      },
      RemoteReply::ImageResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: true,
        image,
      } => DbEvent::ImageSelectStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
        image: image.unwrap_or_default(),
      },
      RemoteReply::ImageResult {
        connection_id,
        query_id,
        ok,
        error,
        is_select: false,
        ..
      } => DbEvent::ImageUpdateStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
      },
    }
  }
}

// ============================================================================
// Framing
// ============================================================================

/// One line on the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "body")]
pub enum RpcFrame {
  Request(QueryRequest),
  Reply(RemoteReply),
}

// ============================================================================
// Channel
// ============================================================================

/// Reliable, ordered transport between peers and the authoritative node.
///
/// A peer only ever calls `send_request`; the authoritative node only ever
/// calls `send_reply`. Implementations return an error for the direction
/// they do not serve.
#[async_trait]
pub trait RemoteRpcChannel: Send + Sync {
  async fn send_request(&self, request: QueryRequest) -> Result<(), RpcError>;

  async fn send_reply(&self, peer: PeerId, reply: RemoteReply) -> Result<(), RpcError>;
}

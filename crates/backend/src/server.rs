//! RPC server for the authoritative node.
//!
//! Peers connect over a Unix socket and exchange newline-delimited JSON
//! [`RpcFrame`]s. Every accepted connection gets its own [`PeerId`]; forwarded
//! requests go to the authoritative actor tagged with that id, and the actor's
//! replies come back through [`RpcServer::channel`] to the matching socket.
//!
//! # Lifecycle
//!
//! 1. `RpcServer::new()` prepares the peer table
//! 2. `RpcServer::channel()` is handed to the authoritative actor at spawn
//! 3. `RpcServer::run()` binds the socket and accepts peers until cancelled
//!
//! Per-peer reply queues are unbounded. The actor replies from inside its
//! loop while peer handlers wait on the actor inbox, so a bounded queue here
//! could leave both sides waiting on each other.

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::{
  net::{UnixListener, UnixStream},
  sync::mpsc,
};
use tokio_util::{
  codec::{Framed, LinesCodec},
  sync::CancellationToken,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
  actor::DbHandle,
  domain::query::PeerId,
  ipc::{QueryRequest, RemoteReply, RemoteRpcChannel, RpcError, RpcFrame},
};

type PeerTable = Arc<DashMap<PeerId, mpsc::UnboundedSender<RemoteReply>>>;

// ============================================================================
// Server
// ============================================================================

pub struct RpcServer {
  socket_path: PathBuf,
  peers: PeerTable,
  next_peer: AtomicU64,
}

impl RpcServer {
  pub fn new(socket_path: impl Into<PathBuf>) -> Self {
    Self {
      socket_path: socket_path.into(),
      peers: Arc::new(DashMap::new()),
      next_peer: AtomicU64::new(0),
    }
  }

  /// Channel the authoritative actor replies through
  pub fn channel(&self) -> Arc<dyn RemoteRpcChannel> {
    Arc::new(ServerChannel {
      peers: Arc::clone(&self.peers),
    })
  }

  pub fn peer_count(&self) -> usize {
    self.peers.len()
  }

  /// Accept peers until the cancellation token fires
  pub async fn run(&self, handle: DbHandle, cancel: CancellationToken) -> Result<(), RpcError> {
    // Remove stale socket file
    if self.socket_path.exists() {
      tokio::fs::remove_file(&self.socket_path).await?;
    }
    if let Some(parent) = self.socket_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let listener = UnixListener::bind(&self.socket_path)?;
    info!("RPC server listening on {:?}", self.socket_path);

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("RPC server shutting down (cancelled)");
          break;
        }

        result = listener.accept() => {
          match result {
            Ok((stream, _)) => {
              let peer = PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed) + 1);
              let (reply_tx, reply_rx) = mpsc::unbounded_channel();
              self.peers.insert(peer, reply_tx);

              let peers = Arc::clone(&self.peers);
              let handle = handle.clone();
              let cancel = cancel.child_token();
              tokio::spawn(async move {
                if let Err(e) = handle_peer(peer, stream, handle, reply_rx, cancel).await {
                  warn!(%peer, error = %e, "Peer connection ended with error");
                }
                peers.remove(&peer);
              });
            }
            Err(e) => {
              error!("Accept error: {}", e);
            }
          }
        }
      }
    }

    if self.socket_path.exists() {
      tokio::fs::remove_file(&self.socket_path).await?;
    }
    Ok(())
  }
}

// ============================================================================
// Connection Handler
// ============================================================================

/// Pump one peer socket: requests in, replies out.
///
/// Malformed lines are logged and skipped. IO errors and EOF end the
/// connection.
async fn handle_peer(
  peer: PeerId,
  stream: UnixStream,
  handle: DbHandle,
  mut replies: mpsc::UnboundedReceiver<RemoteReply>,
  cancel: CancellationToken,
) -> Result<(), RpcError> {
  debug!(%peer, "Peer connected");
  let framed = Framed::new(stream, LinesCodec::new());
  let (mut sink, mut stream) = framed.split();

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,

      Some(reply) = replies.recv() => {
        let json = serde_json::to_string(&RpcFrame::Reply(reply))?;
        sink.send(json).await?;
      }

      line = stream.next() => {
        let line = match line {
          Some(Ok(line)) => line,
          Some(Err(e)) => {
            warn!(%peer, error = %e, "Error reading from peer");
            break;
          }
          None => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }

        match serde_json::from_str::<RpcFrame>(trimmed) {
          Ok(RpcFrame::Request(request)) => {
            trace!(%peer, connection_id = request.connection_id, query = %request.query, "Request received");
            if handle.remote_request(peer, request).await.is_err() {
              debug!(%peer, "Authoritative actor gone, closing peer");
              break;
            }
          }
          Ok(RpcFrame::Reply(_)) => warn!(%peer, "Peer sent a reply frame, ignoring"),
          Err(e) => warn!(%peer, "Invalid frame JSON: {}", e),
        }
      }
    }
  }

  debug!(%peer, "Peer disconnected");
  Ok(())
}

// ============================================================================
// Reply channel
// ============================================================================

struct ServerChannel {
  peers: PeerTable,
}

#[async_trait]
impl RemoteRpcChannel for ServerChannel {
  async fn send_request(&self, _request: QueryRequest) -> Result<(), RpcError> {
    Err(RpcError::Connection("the authoritative node does not forward requests".into()))
  }

  async fn send_reply(&self, peer: PeerId, reply: RemoteReply) -> Result<(), RpcError> {
    let sender = self
      .peers
      .get(&peer)
      .map(|entry| entry.value().clone())
      .ok_or(RpcError::UnknownPeer(peer))?;

    sender
      .send(reply)
      .map_err(|_| RpcError::Connection(format!("{peer} disconnected")))
  }
}

//! In-process RPC between actors
//!
//! A [`PeerDirectory`] knows the handle of the authoritative actor and of
//! every registered peer. Each actor gets its own link from the directory
//! and uses it as its [`RemoteRpcChannel`].

use std::sync::{
  Arc, OnceLock,
  atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{QueryRequest, RemoteReply, RemoteRpcChannel, RpcError};
use crate::{actor::DbHandle, domain::query::PeerId};

#[derive(Debug, Default)]
pub struct PeerDirectory {
  authoritative: OnceLock<DbHandle>,
  peers: DashMap<PeerId, DbHandle>,
  next_peer: AtomicU64,
}

impl PeerDirectory {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn allocate_peer(&self) -> PeerId {
    PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed) + 1)
  }

  /// Link used by the authoritative actor to reply to peers
  pub fn authoritative_link(self: &Arc<Self>) -> Arc<dyn RemoteRpcChannel> {
    Arc::new(LoopbackLink {
      directory: Arc::clone(self),
      peer: None,
    })
  }

  /// Link used by `peer` to forward requests
  pub fn peer_link(self: &Arc<Self>, peer: PeerId) -> Arc<dyn RemoteRpcChannel> {
    Arc::new(LoopbackLink {
      directory: Arc::clone(self),
      peer: Some(peer),
    })
  }

  /// Returns false if an authoritative node was already registered
  pub fn register_authoritative(&self, handle: DbHandle) -> bool {
    self.authoritative.set(handle).is_ok()
  }

  pub fn register_peer(&self, peer: PeerId, handle: DbHandle) {
    debug!(%peer, "Peer registered");
    self.peers.insert(peer, handle);
  }
}

struct LoopbackLink {
  directory: Arc<PeerDirectory>,
  /// `None` for the authoritative side
  peer: Option<PeerId>,
}

#[async_trait]
impl RemoteRpcChannel for LoopbackLink {
  async fn send_request(&self, request: QueryRequest) -> Result<(), RpcError> {
    let Some(peer) = self.peer else {
      return Err(RpcError::Connection("the authoritative node does not forward requests".into()));
    };
    let handle = self
      .directory
      .authoritative
      .get()
      .cloned()
      .ok_or_else(|| RpcError::Connection("no authoritative node registered".into()))?;

    handle
      .remote_request(peer, request)
      .await
      .map_err(|e| RpcError::Connection(e.to_string()))
  }

  async fn send_reply(&self, peer: PeerId, reply: RemoteReply) -> Result<(), RpcError> {
    // Clone out of the map so no shard lock is held across the await
    let handle = self
      .directory
      .peers
      .get(&peer)
      .map(|entry| entry.value().clone())
      .ok_or(RpcError::UnknownPeer(peer))?;

    handle
      .remote_reply(reply)
      .await
      .map_err(|e| RpcError::Connection(e.to_string()))
  }
}

//! Node lifecycle.
//!
//! A node is one [`DbConnectionActor`] plus the transport that links it to
//! the other side:
//!
//! ```text
//! authoritative node                      peer node
//!   ├── RpcServer (Unix socket) ◄──────── RpcClient
//!   └── DbConnectionActor (SQLite)        └── DbConnectionActor
//! ```
//!
//! # Lifecycle (authoritative)
//!
//! 1. Create master `CancellationToken`
//! 2. Create `RpcServer` and spawn the actor with the server's reply channel
//! 3. Log actor events on a background task
//! 4. Run the server until ctrl-c or cancellation
//! 5. Shut the actor down, draining in-flight work

use std::{path::PathBuf, sync::Arc};

use tokio::{signal, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  actor::{DbActorConfig, DbConnectionActor, DbEvent, DbHandle},
  dirs,
  domain::{
    config::{Config, ConfigError},
    replication::NodeRole,
  },
  driver::SqliteFactory,
  ipc::{RpcClient, RpcError},
  server::RpcServer,
};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Rpc(#[from] RpcError),
  #[error("No authoritative node listening on {0:?}")]
  NotRunning(PathBuf),
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything a node needs to start, resolved from the config file
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  pub socket_path: PathBuf,
  pub config: Config,
}

impl RuntimeConfig {
  /// Load `path`, or the user config (created with defaults on first run)
  pub async fn load(path: Option<PathBuf>) -> Result<Self, NodeError> {
    if path.is_none() {
      Self::ensure_user_config().await;
    }
    let config = Config::load(path.as_deref())?;

    Ok(Self {
      socket_path: config.transport.socket_path(),
      config,
    })
  }

  async fn ensure_user_config() {
    let Some(user_config_path) = Config::user_config_path() else {
      return;
    };
    if user_config_path.exists() {
      return;
    }

    if let Some(parent) = user_config_path.parent()
      && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
      warn!("Failed to create config directory: {}", e);
      return;
    }

    match tokio::fs::write(&user_config_path, Config::default().to_toml()).await {
      Ok(()) => info!("Created user config: {:?}", user_config_path),
      Err(e) => warn!("Failed to create user config: {}", e),
    }
  }

  fn actor_config(&self, role: NodeRole) -> DbActorConfig {
    DbActorConfig {
      role,
      ..DbActorConfig::from(&self.config)
    }
  }
}

// ============================================================================
// Node
// ============================================================================

pub struct Node {
  runtime_config: RuntimeConfig,
}

impl Node {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run the authoritative node until ctrl-c or `cancel`.
  pub async fn run_authoritative(self, cancel: CancellationToken) -> Result<(), NodeError> {
    let config = &self.runtime_config;
    info!(
      socket = ?config.socket_path,
      mode = %config.config.node.replication_mode,
      "Starting authoritative node"
    );

    let server = RpcServer::new(config.socket_path.clone());
    let (handle, events) = DbConnectionActor::spawn(
      config.actor_config(NodeRole::Authoritative),
      Arc::new(SqliteFactory),
      Some(server.channel()),
      cancel.child_token(),
    );
    let logger = log_events(events);

    // Handle ctrl-c gracefully
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    let result = server.run(handle.clone(), cancel.child_token()).await;
    if let Err(e) = &result {
      warn!("Server error: {}", e);
    }

    info!("Shutting down...");
    if handle.shutdown().await.is_err() {
      debug!("Actor already stopped");
    }
    drop(handle);
    let _ = logger.await;

    info!("Authoritative node stopped");
    result.map_err(NodeError::from)
  }

  /// Spawn a peer actor connected to the running authoritative node.
  ///
  /// Replies from the authoritative node are fed into the returned handle's
  /// actor and show up on the returned event receiver.
  pub async fn connect_peer(&self, cancel: CancellationToken) -> Result<(DbHandle, mpsc::Receiver<DbEvent>), NodeError> {
    let socket_path = &self.runtime_config.socket_path;
    if !dirs::is_server_running(socket_path) {
      return Err(NodeError::NotRunning(socket_path.clone()));
    }

    let (client, replies) = RpcClient::connect(socket_path).await?;
    let (handle, events) = DbConnectionActor::spawn(
      self.runtime_config.actor_config(NodeRole::Peer),
      Arc::new(SqliteFactory),
      Some(Arc::new(client)),
      cancel,
    );
    RpcClient::forward_replies(replies, handle.clone());

    info!(socket = ?socket_path, "Peer connected to authoritative node");
    Ok((handle, events))
  }
}

/// Log every event until the actor goes away
fn log_events(mut events: mpsc::Receiver<DbEvent>) -> JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      if event.is_ok() {
        debug!(?event, "Event");
      } else {
        warn!(?event, "Event failed");
      }
    }
  })
}

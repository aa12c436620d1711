//! Peer command

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use dbrelay::{
  DbEvent, DbHandle, Node, RuntimeConfig,
  query::ConnectParams,
  replication::{ExecutionContext, ReplicationMode},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PeerArgs {
  pub params: ConnectParams,
  pub select: bool,
  pub context: ExecutionContext,
  pub mode: Option<ReplicationMode>,
  pub statements: Vec<String>,
}

/// Open a connection from a peer node, run the statements and print every
/// result as a JSON line.
pub async fn cmd_peer(config: Option<PathBuf>, args: PeerArgs) -> Result<()> {
  let mut runtime = RuntimeConfig::load(config).await.context("Failed to load config")?;
  if let Some(mode) = args.mode {
    runtime.config.node.replication_mode = mode;
  }

  let cancel = CancellationToken::new();
  let (handle, mut events) = Node::new(runtime)
    .connect_peer(cancel.clone())
    .await
    .context("Failed to start peer")?;

  let result = run_statements(&handle, &mut events, args).await;

  let _ = handle.shutdown().await;
  cancel.cancel();
  result
}

async fn run_statements(handle: &DbHandle, events: &mut mpsc::Receiver<DbEvent>, args: PeerArgs) -> Result<()> {
  handle
    .create_connection(args.params)
    .await
    .context("Connection refused")?;

  let connection_id = match next_event(events).await? {
    DbEvent::ConnectionStateChanged {
      ok: true,
      connection_id,
      ..
    } => connection_id,
    DbEvent::ConnectionStateChanged { error, .. } => bail!("Connect failed: {error}"),
    other => bail!("Unexpected event while connecting: {other:?}"),
  };

  for sql in args.statements {
    let dispatched = if args.select {
      handle.select(connection_id, sql, args.context).await
    } else {
      handle.update(connection_id, sql, args.context).await
    };
    dispatched.context("Query refused")?;

    let event = next_event(events).await?;
    println!("{}", serde_json::to_string(&event)?);
  }

  handle.close(connection_id).await?;
  Ok(())
}

/// Next result event, skipping mode notifications
async fn next_event(events: &mut mpsc::Receiver<DbEvent>) -> Result<DbEvent> {
  loop {
    let event = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
      .await
      .context("Timed out waiting for the authoritative node")?
      .context("Peer actor stopped")?;
    if !matches!(event, DbEvent::ReplicationModeChanged { .. }) {
      return Ok(event);
    }
  }
}

//! Serve command

use std::path::PathBuf;

use anyhow::{Context, Result};
use dbrelay::{Node, RuntimeConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logging::init_node_logging;

/// Run the authoritative node until ctrl-c
pub async fn cmd_serve(config: Option<PathBuf>, foreground: bool) -> Result<()> {
  let runtime = RuntimeConfig::load(config).await.context("Failed to load config")?;
  let _guard = init_node_logging(&runtime.config.logging, foreground);

  info!("Starting dbrelay authoritative node");
  Node::new(runtime)
    .run_authoritative(CancellationToken::new())
    .await
    .context("Authoritative node failed")?;

  Ok(())
}

//! Config command

use std::path::PathBuf;

use anyhow::{Context, Result};
use dbrelay::RuntimeConfig;

/// Print the effective configuration as TOML
pub async fn cmd_config_show(path: Option<PathBuf>) -> Result<()> {
  let runtime = RuntimeConfig::load(path).await.context("Failed to load config")?;
  println!("# socket: {}", runtime.socket_path.display());
  print!("{}", runtime.config.to_toml());
  Ok(())
}

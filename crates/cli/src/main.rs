//! dbrelay - database query relay between an authoritative node and its peers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dbrelay::replication::{ExecutionContext, ReplicationMode};

mod commands;
mod logging;

use commands::{PeerArgs, cmd_config_show, cmd_peer, cmd_serve};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "dbrelay")]
#[command(about = "Serialize and route database queries between an authoritative node and its peers")]
#[command(after_help = "\
QUICK START:
  dbrelay serve --foreground                          # Run the authoritative node
  dbrelay peer --database app.db \"SELECT 1\" --select   # Forward a query from a peer")]
struct Cli {
  /// Config file (default: ~/.config/dbrelay/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the authoritative node
  Serve {
    /// Log to the console instead of the log file
    #[arg(long)]
    foreground: bool,
  },
  /// Run statements from a peer node
  Peer {
    /// Database the connection opens
    #[arg(long)]
    database: String,
    #[arg(long, default_value = "localhost")]
    server: String,
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long, default_value = "0")]
    port: u16,
    /// Treat the statements as selects
    #[arg(long)]
    select: bool,
    /// Where the statements should run
    #[arg(long, value_enum, default_value = "default")]
    context: ContextArg,
    /// Override the configured replication mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Statements to run, in order
    #[arg(required = true)]
    statements: Vec<String>,
  },
  /// Print the effective configuration
  Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
  Default,
  ForceAuthoritative,
  ForcePeer,
}

impl From<ContextArg> for ExecutionContext {
  fn from(arg: ContextArg) -> Self {
    match arg {
      ContextArg::Default => ExecutionContext::Default,
      ContextArg::ForceAuthoritative => ExecutionContext::ForceAuthoritative,
      ContextArg::ForcePeer => ExecutionContext::ForcePeer,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
  AuthoritativeOnly,
  PeerToAuthoritative,
  Broadcast,
}

impl From<ModeArg> for ReplicationMode {
  fn from(arg: ModeArg) -> Self {
    match arg {
      ModeArg::AuthoritativeOnly => ReplicationMode::AuthoritativeOnly,
      ModeArg::PeerToAuthoritative => ReplicationMode::PeerToAuthoritative,
      ModeArg::Broadcast => ReplicationMode::Broadcast,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    // Serve sets up its own logging once the config is loaded
    Commands::Serve { foreground } => cmd_serve(cli.config, foreground).await,
    Commands::Peer {
      database,
      server,
      user,
      password,
      port,
      select,
      context,
      mode,
      statements,
    } => {
      init_cli_logging();
      let args = PeerArgs {
        params: dbrelay::query::ConnectParams::new(server, database, user, password, port),
        select,
        context: context.into(),
        mode: mode.map(Into::into),
        statements,
      };
      cmd_peer(cli.config, args).await
    }
    Commands::Config => {
      init_cli_logging();
      cmd_config_show(cli.config).await
    }
  }
}

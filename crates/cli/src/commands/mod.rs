mod config;
mod peer;
mod serve;

pub use config::cmd_config_show;
pub use peer::{PeerArgs, cmd_peer};
pub use serve::cmd_serve;

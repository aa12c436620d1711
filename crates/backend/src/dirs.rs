//! Filesystem layout of a relay node
//!
//! ```text
//! $XDG_RUNTIME_DIR/dbrelay.sock   RPC socket of the authoritative node
//!                                 (/tmp/dbrelay-<uid>.sock without a runtime dir)
//! <config dir>/dbrelay/config.toml
//! <data dir>/dbrelay/dbrelay.log  rolling log of a background node
//! ```
//!
//! Config and data directories can be pinned with `CONFIG_DIR` / `DATA_DIR`,
//! which are used as-is, or moved with the usual XDG variables.

use std::{
  ffi::OsString,
  path::{Path, PathBuf},
};

const APP_DIR: &str = "dbrelay";

/// Socket the authoritative node listens on when the config names none
pub fn default_socket_path() -> PathBuf {
  match std::env::var_os("XDG_RUNTIME_DIR") {
    Some(runtime_dir) => PathBuf::from(runtime_dir).join("dbrelay.sock"),
    None => {
      // SAFETY: getuid has no preconditions and cannot fail
      let uid = unsafe { libc::getuid() };
      std::env::temp_dir().join(format!("dbrelay-{uid}.sock"))
    }
  }
}

/// Whether an authoritative node accepts connections on `socket_path`
pub fn is_server_running(socket_path: &Path) -> bool {
  std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// Where a background node writes its log files
pub fn default_data_dir() -> PathBuf {
  resolve_dir(
    std::env::var_os("DATA_DIR"),
    std::env::var_os("XDG_DATA_HOME"),
    dirs::data_local_dir(),
  )
}

/// Directory holding `config.toml`
pub fn default_config_dir() -> PathBuf {
  resolve_dir(
    std::env::var_os("CONFIG_DIR"),
    std::env::var_os("XDG_CONFIG_HOME"),
    dirs::config_dir(),
  )
}

/// An explicit override wins outright; XDG and platform bases get the
/// relay's own subdirectory appended.
fn resolve_dir(explicit: Option<OsString>, xdg: Option<OsString>, platform: Option<PathBuf>) -> PathBuf {
  if let Some(dir) = explicit {
    return PathBuf::from(dir);
  }
  xdg
    .map(PathBuf::from)
    .or(platform)
    .unwrap_or_else(|| PathBuf::from("."))
    .join(APP_DIR)
}

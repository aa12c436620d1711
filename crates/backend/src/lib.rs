pub mod actor;
pub mod driver;
pub mod ipc;
pub mod node;
pub mod server;

mod domain;
pub use domain::{config, query, replication};

pub mod dirs;

pub use actor::{DbActorConfig, DbConnectionActor, DbEvent, DbHandle, Dispatch, RequestError};
pub use node::{Node, NodeError, RuntimeConfig};

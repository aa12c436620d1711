//! Actor-based query dispatch
//!
//! Each node runs one [`DbConnectionActor`] as a long-lived task with its own
//! event loop. Callers and the RPC layer talk to it through a cheap-to-clone
//! [`DbHandle`]; blocking driver work runs on tokio's blocking pool and posts
//! its result on a completion channel the actor owns.
//!
//! # Components
//!
//! - [`registry`]: arena of connections, the only strong owner of drivers
//! - [`query_id`]: per-connection query sequence numbers
//! - [`executor`]: runs one driver job off the actor loop
//! - [`queue`]: at most one task running per actor
//! - [`policy`]: run locally, forward, or reject
//! - [`correlator`]: which peer is waiting on which forwarded request
//!
//! ```text
//! DbHandle ──► inbox ──► DbConnectionActor ──► TaskExecutor (blocking pool)
//!                              ▲   │                  │
//!                              └───┼── Completion ◄───┘
//!                                  ├──► DbEvent (local)
//!                                  └──► RemoteReply (peer, via RemoteRpcChannel)
//! ```

pub mod connection;
pub mod correlator;
pub mod executor;
pub mod handle;
pub mod message;
pub mod policy;
pub mod query_id;
pub mod queue;
pub mod registry;


pub use connection::{DbActorConfig, DbConnectionActor};
pub use handle::{DbHandle, RequestError, SendError};
pub use message::{DbEvent, Dispatch};
pub use policy::{Decision, RoutingError};

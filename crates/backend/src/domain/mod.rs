//! Domain types - core entities of the query relay
//!
//! This module contains the canonical types shared by the actor, the drivers
//! and the RPC layer. They are independent of any particular transport or
//! database engine.

pub mod config;
pub mod query;
pub mod replication;

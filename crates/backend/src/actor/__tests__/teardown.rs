//! Teardown tests: shutdown, cancellation and dropped handles.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{MockFactory, collect_events, config, connect, spawn_actor, spawn_authoritative, wait_for},
      handle::SendError,
      message::DbEvent,
    },
    domain::replication::{ExecutionContext, NodeRole, ReplicationMode},
  };

  const CTX: ExecutionContext = ExecutionContext::Default;

  /// Test: shutdown waits for outstanding selects, then closes every connection.
  #[tokio::test]
  async fn test_shutdown_completes_outstanding_work() {
    let factory = MockFactory::with_latency(Duration::from_millis(50));
    let mut actor = spawn_authoritative(&factory);
    let a = connect(&mut actor, "a").await;
    let b = connect(&mut actor, "b").await;

    actor.handle.select(a, "SELECT a", CTX).await.expect("select a");
    actor.handle.select(b, "SELECT b", CTX).await.expect("select b");
    actor.handle.shutdown().await.expect("shutdown");

    let events = collect_events(&mut actor.events, 2).await;
    assert!(events.iter().all(DbEvent::is_ok), "{events:?}");
    assert_eq!(factory.stats().executed.len(), 2);
    assert_eq!(factory.stats().closes, 2);

    assert_eq!(actor.handle.connections().await, Err(SendError::ActorGone));
  }

  /// Test: with draining disabled only the running task finishes.
  #[tokio::test]
  async fn test_shutdown_without_drain_drops_pending() {
    let factory = MockFactory::with_latency(Duration::from_millis(100));
    let mut cfg = config(NodeRole::Authoritative, ReplicationMode::AuthoritativeOnly);
    cfg.queue.drain_on_shutdown = false;
    let mut actor = spawn_actor(cfg, Arc::new(factory.clone()), None);
    let id = connect(&mut actor, "db").await;

    for i in 0..3 {
      actor.handle.select(id, format!("SELECT {i}"), CTX).await.expect("select");
    }
    actor.handle.shutdown().await.expect("shutdown");

    assert_eq!(factory.stats().executed, vec!["SELECT 0".to_string()]);
    assert_eq!(factory.stats().closes, 1);

    // One event for the running select, then the channel closes
    assert!(actor.events.recv().await.is_some_and(|e| e.is_ok()));
    assert!(actor.events.recv().await.is_none());
  }

  #[tokio::test]
  async fn test_cancellation_closes_connections() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    connect(&mut actor, "a").await;
    connect(&mut actor, "b").await;

    actor.cancel.cancel();

    let handle = actor.handle.clone();
    let stopped = wait_for(Duration::from_secs(2), || {
      let handle = handle.clone();
      async move { handle.connections().await.is_err() }
    })
    .await;
    assert!(stopped, "actor should stop after cancellation");
    assert_eq!(factory.stats().closes, 2);
  }

  /// Test: dropping the last handle tears the actor down.
  #[tokio::test]
  async fn test_dropping_handles_stops_actor() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    connect(&mut actor, "db").await;

    drop(actor.handle);
    let closed = tokio::time::timeout(Duration::from_secs(2), actor.events.recv()).await;
    assert!(matches!(closed, Ok(None)), "event channel should close");
    assert_eq!(factory.stats().closes, 1);
  }

  /// Test: work queued before the last handle is dropped still runs, and
  /// every result is reported before the event channel closes.
  #[tokio::test]
  async fn test_dropping_handles_drains_queued_work() {
    let factory = MockFactory::with_latency(Duration::from_millis(100));
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    for i in 0..3 {
      actor.handle.select(id, format!("SELECT {i}"), CTX).await.expect("select");
    }
    drop(actor.handle);

    let events = collect_events(&mut actor.events, 3).await;
    assert!(events.iter().all(DbEvent::is_ok), "{events:?}");
    let closed = tokio::time::timeout(Duration::from_secs(2), actor.events.recv()).await;
    assert!(matches!(closed, Ok(None)), "event channel should close");

    let stats = factory.stats();
    assert_eq!(stats.executed, vec!["SELECT 0", "SELECT 1", "SELECT 2"]);
    assert_eq!(stats.closes, 1);
  }

  /// Test: a second shutdown after the actor is gone reports ActorGone.
  #[tokio::test]
  async fn test_shutdown_twice() {
    let factory = MockFactory::default();
    let actor = spawn_authoritative(&factory);

    actor.handle.shutdown().await.expect("first shutdown");
    assert_eq!(actor.handle.shutdown().await, Err(SendError::ActorGone));
  }
}

//! Dispatch tests for a single authoritative actor.
//!
//! Covers serialization of query tasks, dispatch order, query id lifecycle
//! and connection lifecycle against the mock driver.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{
        MockFactory, assert_quiet, collect_events, config, connect, next_event, params, spawn_actor,
        spawn_authoritative, wait_for,
      },
      executor::INVALID_CONNECTION,
      message::{DbEvent, Dispatch},
    },
    domain::{
      config::DispatchOrder,
      query::{NO_ID, Value},
      replication::{ExecutionContext, NodeRole, ReplicationMode},
    },
  };

  const CTX: ExecutionContext = ExecutionContext::Default;

  fn select_query_id(event: &DbEvent) -> i32 {
    match event {
      DbEvent::QuerySelectStatusChanged { query_id, ok: true, .. } => *query_id,
      other => panic!("expected successful select, got {other:?}"),
    }
  }

  // ==========================================================================
  // Serialization
  // ==========================================================================

  /// Test: N queued tasks produce N events and never overlap on the driver.
  #[tokio::test]
  async fn test_tasks_run_one_at_a_time() {
    let factory = MockFactory::with_latency(Duration::from_millis(10));
    let mut actor = spawn_authoritative(&factory);
    let a = connect(&mut actor, "a").await;
    let b = connect(&mut actor, "b").await;

    for i in 0..4 {
      actor.handle.select(a, format!("SELECT {i}"), CTX).await.expect("select a");
      actor.handle.update(b, format!("UPDATE {i}"), CTX).await.expect("update b");
    }

    let events = collect_events(&mut actor.events, 8).await;
    assert!(events.iter().all(DbEvent::is_ok), "all tasks succeed: {events:?}");
    assert_eq!(factory.stats().executed.len(), 8);
    assert_eq!(factory.stats().max_active, 1);
  }

  /// Test: query ids are issued at enqueue, sequentially per connection.
  #[tokio::test]
  async fn test_query_ids_issued_at_enqueue() {
    let factory = MockFactory::with_latency(Duration::from_millis(20));
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    let mut dispatched = Vec::new();
    for i in 0..3 {
      dispatched.push(actor.handle.select(id, format!("SELECT {i}"), CTX).await.expect("select"));
    }
    assert_eq!(
      dispatched,
      (0..3)
        .map(|query_id| Dispatch::Queued {
          connection_id: id,
          query_id
        })
        .collect::<Vec<_>>()
    );

    let ids: Vec<_> = collect_events(&mut actor.events, 3).await.iter().map(select_query_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
  }

  /// Test: LIFO order runs the newest pending task first.
  #[tokio::test]
  async fn test_lifo_dispatch_order() {
    let factory = MockFactory::with_latency(Duration::from_millis(100));
    let mut cfg = config(NodeRole::Authoritative, ReplicationMode::AuthoritativeOnly);
    cfg.queue.dispatch_order = DispatchOrder::Lifo;
    let mut actor = spawn_actor(cfg, Arc::new(factory.clone()), None);
    let id = connect(&mut actor, "db").await;

    // The first select starts immediately, the rest wait behind it
    for i in 0..4 {
      actor.handle.select(id, format!("SELECT {i}"), CTX).await.expect("select");
    }

    let ids: Vec<_> = collect_events(&mut actor.events, 4).await.iter().map(select_query_id).collect();
    assert_eq!(ids, vec![0, 3, 2, 1]);
  }

  // ==========================================================================
  // Query id lifecycle
  // ==========================================================================

  /// Test: peek reports -1 before any query and 0 once the queue goes idle.
  #[tokio::test]
  async fn test_query_ids_reset_when_idle() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;
    assert_eq!(actor.handle.peek_query_id(id).await.expect("peek"), NO_ID);

    for i in 0..3 {
      actor.handle.update(id, format!("UPDATE {i}"), CTX).await.expect("update");
    }
    collect_events(&mut actor.events, 3).await;

    assert_eq!(actor.handle.peek_query_id(id).await.expect("peek"), 0);
    let dispatch = actor.handle.update(id, "UPDATE again", CTX).await.expect("update");
    assert_eq!(
      dispatch,
      Dispatch::Queued {
        connection_id: id,
        query_id: 0
      }
    );
  }

  #[tokio::test]
  async fn test_is_query_running() {
    let factory = MockFactory::with_latency(Duration::from_millis(200));
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;
    assert!(!actor.handle.is_query_running(id).await.expect("running"));

    actor.handle.select(id, "SELECT slow", CTX).await.expect("select");
    assert!(actor.handle.is_query_running(id).await.expect("running"));

    next_event(&mut actor.events).await;
    assert!(!actor.handle.is_query_running(id).await.expect("running"));
  }

  /// Test: a select queued while the connection is still connecting waits
  /// for the connect, then runs with the connection reported busy.
  #[tokio::test]
  async fn test_queued_work_waits_for_connect() {
    let factory = MockFactory::with_latency(Duration::from_millis(200)).with_connect_latency(Duration::from_millis(100));
    let mut actor = spawn_authoritative(&factory);

    let dispatch = actor.handle.create_connection(params("db")).await.expect("create");
    let Dispatch::Connecting(id) = dispatch else {
      panic!("expected Connecting, got {dispatch:?}");
    };
    let queued = actor.handle.select(id, "SELECT early", CTX).await.expect("select");
    assert_eq!(
      queued,
      Dispatch::Queued {
        connection_id: id,
        query_id: 0
      }
    );

    let connected = next_event(&mut actor.events).await;
    assert!(
      matches!(connected, DbEvent::ConnectionStateChanged { ok: true, .. }),
      "connect reports first: {connected:?}"
    );
    assert!(actor.handle.is_query_running(id).await.expect("running"));

    let selected = next_event(&mut actor.events).await;
    assert_eq!(select_query_id(&selected), 0);
    assert!(!actor.handle.is_query_running(id).await.expect("running"));

    let stats = factory.stats();
    assert_eq!(stats.unconnected_runs, 0);
    assert_eq!(stats.max_active, 1);
  }

  // ==========================================================================
  // Failures
  // ==========================================================================

  /// Test: a task for a connection that does not exist fails with "Invalid connection".
  #[tokio::test]
  async fn test_unknown_connection_fails_task() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);

    let dispatch = actor.handle.select(7, "SELECT 1", CTX).await.expect("select");
    assert_eq!(
      dispatch,
      Dispatch::Queued {
        connection_id: 7,
        query_id: 0
      }
    );

    match next_event(&mut actor.events).await {
      DbEvent::QuerySelectStatusChanged {
        connection_id,
        query_id,
        ok,
        error,
        result,
      } => {
        assert_eq!((connection_id, query_id, ok), (7, 0, false));
        assert_eq!(error, INVALID_CONNECTION);
        assert!(result.is_empty());
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(factory.stats().executed.is_empty());
    assert_eq!(actor.handle.peek_query_id(7).await.expect("peek"), NO_ID);
  }

  #[tokio::test]
  async fn test_update_many_stops_at_first_failure() {
    let factory = MockFactory::default();
    factory.fail_on("bad");
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    let statements = vec!["good".to_string(), "bad".to_string(), "never".to_string()];
    actor.handle.update_many(id, statements, CTX).await.expect("update");

    match next_event(&mut actor.events).await {
      DbEvent::QueryUpdateStatusChanged { ok, error, .. } => {
        assert!(!ok);
        assert!(error.contains("bad"), "error names the failing statement: {error}");
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(factory.stats().executed, vec!["good".to_string(), "bad".to_string()]);
  }

  /// Test: a failed connect gives its id back to the next connection.
  #[tokio::test]
  async fn test_failed_connect_reuses_id() {
    let factory = MockFactory::default();
    factory.fail_connect(true);
    let mut actor = spawn_authoritative(&factory);

    let dispatch = actor.handle.create_connection(params("db")).await.expect("create");
    assert_eq!(dispatch, Dispatch::Connecting(0));
    match next_event(&mut actor.events).await {
      DbEvent::ConnectionStateChanged {
        ok: false,
        connection_id: 0,
        error,
      } => assert!(!error.is_empty()),
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(actor.handle.connections().await.expect("connections").is_empty());

    factory.fail_connect(false);
    assert_eq!(connect(&mut actor, "db").await, 0);
  }

  // ==========================================================================
  // Images
  // ==========================================================================

  #[tokio::test]
  async fn test_image_round_trip_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("avatar.png");
    std::fs::write(&image, [0x89, b'P', b'N', b'G']).expect("write image");

    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    actor
      .handle
      .update_image(id, "UPDATE users SET avatar = :avatar", "avatar", 1, &image, CTX)
      .await
      .expect("update image");
    actor
      .handle
      .select_image(id, "SELECT avatar FROM users", CTX)
      .await
      .expect("select image");

    let events = collect_events(&mut actor.events, 2).await;
    assert!(matches!(events[0], DbEvent::ImageUpdateStatusChanged { ok: true, .. }));
    match &events[1] {
      DbEvent::ImageSelectStatusChanged { ok: true, image, .. } => {
        assert_eq!(image.as_slice(), b"SELECT avatar FROM users");
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_select_result_delivered() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    actor.handle.select(id, "SELECT name", CTX).await.expect("select");
    match next_event(&mut actor.events).await {
      DbEvent::QuerySelectStatusChanged { ok: true, result, .. } => {
        assert_eq!(result.columns, vec!["sql".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Text("SELECT name".to_string())]]);
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  // ==========================================================================
  // Connection lifecycle
  // ==========================================================================

  #[tokio::test]
  async fn test_close_unknown_connection_is_noop() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);

    actor.handle.close(42).await.expect("close");
    assert_quiet(&mut actor.events).await;
    assert!(actor.handle.connections().await.expect("connections").is_empty());
    assert_eq!(factory.stats().closes, 0);
  }

  /// Test: close waits behind queued work on the same queue.
  #[tokio::test]
  async fn test_close_runs_after_pending_queries() {
    let factory = MockFactory::with_latency(Duration::from_millis(50));
    let mut actor = spawn_authoritative(&factory);
    let id = connect(&mut actor, "db").await;

    actor.handle.select(id, "SELECT 1", CTX).await.expect("select");
    actor.handle.close(id).await.expect("close");

    assert!(next_event(&mut actor.events).await.is_ok());
    let handle = actor.handle.clone();
    assert!(
      wait_for(Duration::from_secs(2), || {
        let handle = handle.clone();
        async move { handle.connections().await.is_ok_and(|ids| ids.is_empty()) }
      })
      .await
    );
    assert_eq!(factory.stats().closes, 1);
    assert_eq!(actor.handle.peek_query_id(id).await.expect("peek"), NO_ID);
  }

  #[tokio::test]
  async fn test_close_all() {
    let factory = MockFactory::default();
    let mut actor = spawn_authoritative(&factory);
    connect(&mut actor, "a").await;
    connect(&mut actor, "b").await;

    actor.handle.close_all().await.expect("close all");
    assert!(actor.handle.connections().await.expect("connections").is_empty());
    assert_eq!(factory.stats().closes, 2);

    // Ids keep counting up after a close
    assert_eq!(connect(&mut actor, "c").await, 2);
  }
}

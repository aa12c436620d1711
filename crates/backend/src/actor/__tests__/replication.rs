//! End-to-end tests for a peer forwarding through the in-process loopback to
//! an authoritative node backed by SQLite.

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use tempfile::TempDir;

  use crate::{
    actor::{
      __tests__::helpers::{MockFactory, TestActor, config, next_event, spawn_actor},
      message::{DbEvent, Dispatch},
    },
    domain::{
      query::{ConnectParams, NO_ID, Value},
      replication::{ExecutionContext, NodeRole, ReplicationMode},
    },
    driver::SqliteFactory,
    ipc::PeerDirectory,
  };

  const CTX: ExecutionContext = ExecutionContext::Default;

  struct Cluster {
    _dir: TempDir,
    database: String,
    authoritative: TestActor,
    peer: TestActor,
    peer_factory: MockFactory,
  }

  fn cluster() -> Cluster {
    let dir = TempDir::new().expect("tempdir");
    let database = dir.path().join("relay.db").to_string_lossy().into_owned();
    let directory = PeerDirectory::new();

    let authoritative = spawn_actor(
      config(NodeRole::Authoritative, ReplicationMode::PeerToAuthoritative),
      Arc::new(SqliteFactory),
      Some(directory.authoritative_link()),
    );
    assert!(directory.register_authoritative(authoritative.handle.clone()));

    let peer_id = directory.allocate_peer();
    let peer_factory = MockFactory::default();
    let peer = spawn_actor(
      config(NodeRole::Peer, ReplicationMode::PeerToAuthoritative),
      Arc::new(peer_factory.clone()),
      Some(directory.peer_link(peer_id)),
    );
    directory.register_peer(peer_id, peer.handle.clone());

    Cluster {
      _dir: dir,
      database,
      authoritative,
      peer,
      peer_factory,
    }
  }

  async fn expect_update_ok(actor: &mut TestActor) {
    match next_event(&mut actor.events).await {
      DbEvent::QueryUpdateStatusChanged { ok: true, .. } => {}
      other => panic!("expected successful update, got {other:?}"),
    }
  }

  /// Test: a peer opens a connection, writes and reads through the authoritative node.
  #[tokio::test]
  async fn test_peer_round_trip_through_authoritative() {
    let mut c = cluster();
    let params = ConnectParams::new("localhost", c.database.clone(), "user", "pw", 0);

    let dispatch = c.peer.handle.create_connection(params).await.expect("create");
    assert_eq!(dispatch, Dispatch::Forwarded);
    assert_eq!(
      next_event(&mut c.peer.events).await,
      DbEvent::ConnectionStateChanged {
        ok: true,
        connection_id: 0,
        error: String::new(),
      }
    );
    assert_eq!(c.peer.handle.connections().await.expect("connections"), vec![0]);

    c.peer
      .handle
      .update(0, "CREATE TABLE items (n INTEGER)", CTX)
      .await
      .expect("create table");
    expect_update_ok(&mut c.peer).await;

    c.peer
      .handle
      .update(0, "INSERT INTO items VALUES (7)", CTX)
      .await
      .expect("insert");
    expect_update_ok(&mut c.peer).await;

    c.peer.handle.select(0, "SELECT n FROM items", CTX).await.expect("select");
    match next_event(&mut c.peer.events).await {
      DbEvent::QuerySelectStatusChanged { ok: true, result, .. } => {
        assert_eq!(result.columns, vec!["n".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Integer(7)]]);
      }
      other => panic!("unexpected event: {other:?}"),
    }

    // Nothing ran on the peer's own driver
    assert_eq!(c.peer_factory.stats().connects, 0);
    assert!(c.peer_factory.stats().executed.is_empty());

    // The authoritative node saw the same work as local events
    assert!(next_event(&mut c.authoritative.events).await.is_ok());
  }

  #[tokio::test]
  async fn test_peer_receives_remote_failure() {
    let mut c = cluster();
    let params = ConnectParams::new("localhost", c.database.clone(), "user", "pw", 0);
    c.peer.handle.create_connection(params).await.expect("create");
    next_event(&mut c.peer.events).await;

    c.peer
      .handle
      .update(0, "INSERT INTO missing VALUES (1)", CTX)
      .await
      .expect("forwarded");
    match next_event(&mut c.peer.events).await {
      DbEvent::QueryUpdateStatusChanged {
        connection_id, ok, error, ..
      } => {
        assert_eq!(connection_id, 0);
        assert!(!ok);
        assert!(error.contains("missing"), "{error}");
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  /// Test: the authoritative node refuses forwarded work once the mode changes.
  #[tokio::test]
  async fn test_mode_change_refuses_forwarded_work() {
    let mut c = cluster();
    c.authoritative
      .handle
      .set_replication_mode(ReplicationMode::AuthoritativeOnly)
      .await
      .expect("set mode");

    c.peer.handle.select(0, "SELECT 1", CTX).await.expect("forwarded");
    match next_event(&mut c.peer.events).await {
      DbEvent::QuerySelectStatusChanged {
        query_id, ok, error, ..
      } => {
        assert_eq!(query_id, NO_ID);
        assert!(!ok);
        assert!(error.contains("AuthoritativeOnly"), "{error}");
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_peer_close_all_closes_remote_connections() {
    let mut c = cluster();
    for _ in 0..2 {
      let params = ConnectParams::new("localhost", c.database.clone(), "user", "pw", 0);
      c.peer.handle.create_connection(params).await.expect("create");
      assert!(next_event(&mut c.peer.events).await.is_ok());
    }
    assert_eq!(c.peer.handle.connections().await.expect("connections"), vec![0, 1]);

    c.peer.handle.close_all().await.expect("close all");
    assert!(c.peer.handle.connections().await.expect("connections").is_empty());

    let authoritative = c.authoritative.handle.clone();
    let closed = crate::actor::__tests__::helpers::wait_for(std::time::Duration::from_secs(2), || {
      let authoritative = authoritative.clone();
      async move { authoritative.connections().await.is_ok_and(|ids| ids.is_empty()) }
    })
    .await;
    assert!(closed, "authoritative node should close the forwarded connections");
  }
}

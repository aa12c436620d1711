//! QueryTaskQueue - one-task-at-a-time dispatch for an actor
//!
//! The queue only tracks state; the actor decides how a task runs. Its
//! state machine is:
//!
//! ```text
//! Idle --enqueue--> Running --complete--> Idle | Running(next)
//! ```

use std::collections::VecDeque;

use crate::domain::{
  config::DispatchOrder,
  query::{ConnectionId, PeerId, QueryId, QueryKind, QueryPayload},
};

/// Where a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  Local,
  /// Forwarded by a peer; the result is sent back to it
  Remote(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTask {
  pub connection_id: ConnectionId,
  pub query_id: QueryId,
  pub payload: QueryPayload,
  pub origin: Origin,
}

impl QueryTask {
  pub fn kind(&self) -> QueryKind {
    self.payload.kind()
  }
}

#[derive(Debug)]
pub struct QueryTaskQueue {
  order: DispatchOrder,
  pending: VecDeque<QueryTask>,
  running: bool,
}

impl QueryTaskQueue {
  pub fn new(order: DispatchOrder) -> Self {
    Self {
      order,
      pending: VecDeque::new(),
      running: false,
    }
  }

  pub fn enqueue(&mut self, task: QueryTask) {
    self.pending.push_back(task);
  }

  /// The task `start_next` would hand out, without taking it
  pub fn peek_next(&self) -> Option<&QueryTask> {
    if self.running {
      return None;
    }
    match self.order {
      DispatchOrder::Fifo => self.pending.front(),
      DispatchOrder::Lifo => self.pending.back(),
    }
  }

  /// Take the next task to run, or `None` while a task is running or
  /// nothing is pending.
  pub fn start_next(&mut self) -> Option<QueryTask> {
    if self.running {
      return None;
    }
    let task = match self.order {
      DispatchOrder::Fifo => self.pending.pop_front(),
      DispatchOrder::Lifo => self.pending.pop_back(),
    }?;
    self.running = true;
    Some(task)
  }

  /// Mark the running task finished. Returns true when the queue went idle
  /// with nothing left pending.
  pub fn complete(&mut self) -> bool {
    self.running = false;
    self.pending.is_empty()
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub fn is_idle(&self) -> bool {
    !self.running && self.pending.is_empty()
  }

  /// Remove every pending task in dispatch order
  pub fn drain(&mut self) -> Vec<QueryTask> {
    match self.order {
      DispatchOrder::Fifo => self.pending.drain(..).collect(),
      DispatchOrder::Lifo => self.pending.drain(..).rev().collect(),
    }
  }
}

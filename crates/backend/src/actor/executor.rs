//! TaskExecutor - runs blocking driver work off the actor loop
//!
//! Each job runs on tokio's blocking pool and posts a [`Completion`] to the
//! actor's completion channel. That channel is separate from the caller
//! inbox, so completions keep flowing after every `DbHandle` is dropped.
//! Jobs only hold a `Weak` driver handle:
//!
//! - driver gone before the job runs: the job fails with "Invalid connection"
//! - actor gone when the job finishes: the completion is discarded
//!
//! A driver that panics is reported as a failed completion so the actor
//! always gets to clear its busy state.

use std::{
  path::PathBuf,
  sync::{Mutex, Weak},
};

use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, trace, warn};

use super::{
  message::{Completion, JobResult},
  queue::Origin,
};
use crate::{
  domain::query::{ConnectParams, ConnectionId, QueryId, QueryPayload},
  driver::{Driver, DriverError},
};

/// Error reported when a job's connection was closed before it ran
pub const INVALID_CONNECTION: &str = "Invalid connection";

/// One blocking driver operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
  Connect(ConnectParams),
  /// Statements run in order; the first failure stops the job
  Update {
    statements: Vec<String>,
  },
  Select {
    sql: String,
  },
  WriteImage {
    sql: String,
    column: String,
    param_id: i32,
    image_path: PathBuf,
  },
  ReadImage {
    sql: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
  Connect,
  Update,
  Select,
  WriteImage,
  ReadImage,
}

impl JobKind {
  fn failed(self, error: String) -> JobResult {
    match self {
      JobKind::Connect => JobResult::Connected(Err(error)),
      JobKind::Update => JobResult::Updated(Err(error)),
      JobKind::Select => JobResult::Selected(Err(error)),
      JobKind::WriteImage => JobResult::ImageWritten(Err(error)),
      JobKind::ReadImage => JobResult::ImageRead(Err(error)),
    }
  }
}

impl Job {
  /// Job for a queued payload. Close and EndPlay run inline and have none.
  pub fn from_payload(payload: QueryPayload) -> Option<Self> {
    match payload {
      QueryPayload::Update { statements } => Some(Job::Update { statements }),
      QueryPayload::Select { sql } => Some(Job::Select { sql }),
      QueryPayload::ImageUpdate {
        sql,
        column,
        param_id,
        image_path,
      } => Some(Job::WriteImage {
        sql,
        column,
        param_id,
        image_path,
      }),
      QueryPayload::ImageSelect { sql } => Some(Job::ReadImage { sql }),
      QueryPayload::Close | QueryPayload::EndPlay => None,
    }
  }

  fn kind(&self) -> JobKind {
    match self {
      Job::Connect(_) => JobKind::Connect,
      Job::Update { .. } => JobKind::Update,
      Job::Select { .. } => JobKind::Select,
      Job::WriteImage { .. } => JobKind::WriteImage,
      Job::ReadImage { .. } => JobKind::ReadImage,
    }
  }

  /// Run against `driver`. Called on the blocking pool.
  fn run(self, driver: &Weak<Mutex<Box<dyn Driver>>>) -> JobResult {
    let kind = self.kind();
    let Some(driver) = driver.upgrade() else {
      return kind.failed(INVALID_CONNECTION.to_string());
    };
    let Ok(mut driver) = driver.lock() else {
      return kind.failed(DriverError::Poisoned.to_string());
    };

    fn text<T>(r: Result<T, DriverError>) -> Result<T, String> {
      r.map_err(|e| e.to_string())
    }

    match self {
      Job::Connect(params) => JobResult::Connected(text(driver.connect(&params))),
      Job::Update { statements } => JobResult::Updated(text(
        statements.iter().try_for_each(|sql| driver.exec_update(sql)),
      )),
      Job::Select { sql } => JobResult::Selected(text(driver.exec_select(&sql))),
      Job::WriteImage {
        sql,
        column,
        param_id,
        image_path,
      } => JobResult::ImageWritten(text(driver.write_image(&sql, &column, param_id, &image_path))),
      Job::ReadImage { sql } => JobResult::ImageRead(text(driver.read_image(&sql))),
    }
  }
}

/// Identifies the task a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
  pub connection_id: ConnectionId,
  pub query_id: QueryId,
  pub origin: Origin,
}

pub struct TaskExecutor {
  completions: mpsc::UnboundedSender<Completion>,
  tasks: JoinSet<()>,
}

impl TaskExecutor {
  pub fn new(completions: mpsc::UnboundedSender<Completion>) -> Self {
    Self {
      completions,
      tasks: JoinSet::new(),
    }
  }

  pub fn execute(&mut self, ticket: Ticket, driver: Weak<Mutex<Box<dyn Driver>>>, job: Job) {
    let completions = self.completions.clone();
    let kind = job.kind();
    trace!(connection_id = ticket.connection_id, query_id = ticket.query_id, ?kind, "Dispatching job");

    self.tasks.spawn(async move {
      let result = match tokio::task::spawn_blocking(move || job.run(&driver)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
          warn!(connection_id = ticket.connection_id, query_id = ticket.query_id, "Driver panicked");
          kind.failed("Driver panicked".to_string())
        }
        Err(e) => kind.failed(e.to_string()),
      };

      let completion = Completion {
        connection_id: ticket.connection_id,
        query_id: ticket.query_id,
        origin: ticket.origin,
        result,
      };

      if completions.send(completion).is_err() {
        debug!(
          connection_id = ticket.connection_id,
          query_id = ticket.query_id,
          "Actor gone, discarding completion"
        );
      }
    });
  }

  /// Jobs spawned and not yet joined
  pub fn in_flight(&self) -> usize {
    self.tasks.len()
  }

  /// Drop bookkeeping for jobs that already finished
  pub fn reap(&mut self) {
    while let Some(joined) = self.tasks.try_join_next() {
      if let Err(e) = joined {
        warn!(error = %e, "Executor task failed");
      }
    }
  }

  /// Wait for the next job to finish. Returns `None` when nothing is in flight.
  pub async fn join_next(&mut self) -> Option<()> {
    match self.tasks.join_next().await? {
      Ok(()) => Some(()),
      Err(e) => {
        warn!(error = %e, "Executor task failed");
        Some(())
      }
    }
  }
}

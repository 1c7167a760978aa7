use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;

use crate::env::Environment;
use crate::slots::SlotId;
use crate::status::Status;

/// A handle to an async work item created by
/// [`Environment::create_async_work`](crate::Environment::create_async_work).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct WorkId(pub(crate) SlotId);

impl WorkId {
  pub fn slot(self) -> SlotId {
    self.0
  }
}

/// Lifecycle of an async work item.
///
/// `Created → Queued → Running → Completed` on the normal path, `Created → Queued → Cancelled`
/// when cancelled before a worker picks the item up. `Running` only ever moves to `Completed`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WorkState {
  Created,
  Queued,
  Running,
  Completed,
  Cancelled,
}

pub(crate) type SharedState = Arc<AtomicCell<WorkState>>;

/// The type-erased body of a work item. It travels from the logical thread to a worker and back.
pub(crate) trait Task: Send {
  /// Runs the execute step. Subsequent calls are no-ops.
  fn execute(&mut self);

  fn complete(self: Box<Self>, env: &mut Environment, work: WorkId, status: Status);
}

struct TypedTask<D, E, C> {
  data: D,
  execute: Option<E>,
  complete: C,
}

impl<D, E, C> Task for TypedTask<D, E, C>
where
  D: Send + 'static,
  E: FnOnce(&mut D) + Send + 'static,
  C: FnOnce(&mut Environment, WorkId, Status, D) + Send + 'static,
{
  fn execute(&mut self) {
    if let Some(execute) = self.execute.take() {
      execute(&mut self.data);
    }
  }

  fn complete(self: Box<Self>, env: &mut Environment, work: WorkId, status: Status) {
    let TypedTask { data, complete, .. } = *self;
    complete(env, work, status, data);
  }
}

pub(crate) fn boxed_task<D, E, C>(data: D, execute: E, complete: C) -> Box<dyn Task>
where
  D: Send + 'static,
  E: FnOnce(&mut D) + Send + 'static,
  C: FnOnce(&mut Environment, WorkId, Status, D) + Send + 'static,
{
  Box::new(TypedTask {
    data,
    execute: Some(execute),
    complete,
  })
}

/// Logical-thread bookkeeping for one work item.
pub(crate) struct WorkItem {
  pub resource_name: Arc<str>,
  pub state: SharedState,
  /// Present only while the item is `Created`.
  pub task: Option<Box<dyn Task>>,
  /// Set from queueing until the completion has been drained from the channel.
  pub awaiting_completion: bool,
}

impl WorkItem {
  pub fn new(resource_name: &str, task: Box<dyn Task>) -> Self {
    Self {
      resource_name: Arc::from(resource_name),
      state: Arc::new(AtomicCell::new(WorkState::Created)),
      task: Some(task),
      awaiting_completion: false,
    }
  }
}

/// A finished (or cancelled) item on its way back to the logical thread.
pub(crate) struct Completion {
  pub work: WorkId,
  pub status: Status,
  pub task: Box<dyn Task>,
}

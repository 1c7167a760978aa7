use core::fmt;
use std::any::Any;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;

use tracing::debug;
use tracing::debug_span;
use tracing::trace;
use tracing::warn;

use crate::error::NapiError;
use crate::error::NapiResult;
use crate::instance_data::FinalizeCallback;
use crate::instance_data::InstanceDataSlot;
use crate::reference::ReferenceId;
use crate::reference::ReferenceTable;
use crate::scheduler::AsyncWorkScheduler;
use crate::scheduler::Job;
use crate::slots::Slots;
use crate::status::ExtendedErrorInfo;
use crate::status::Status;
use crate::value::ErrorKind;
use crate::value::JsObject;
use crate::value::Value;
use crate::work::boxed_task;
use crate::work::Completion;
use crate::work::WorkId;
use crate::work::WorkItem;
use crate::work::WorkState;

static NEXT_ENV_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identifier of an [`Environment`], used to route completions and in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EnvId(u32);

impl fmt::Display for EnvId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "env#{}", self.0)
  }
}

/// Hook run once during environment teardown.
pub type CleanupHook = Box<dyn FnOnce(&mut Environment)>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CleanupHookId(u32);

/// Per-instance runtime context.
///
/// An environment belongs to the logical thread that created it (it is neither `Send` nor
/// `Sync`). Every fallible operation returns a [`NapiResult`] and latches the same outcome into
/// the environment's last-error state before returning.
pub struct Environment {
  id: EnvId,
  last_error: ExtendedErrorInfo,
  instance_data: InstanceDataSlot,
  references: ReferenceTable,
  works: Slots<WorkItem>,
  scheduler: AsyncWorkScheduler,
  completion_tx: Sender<Completion>,
  completion_rx: Receiver<Completion>,
  in_flight: usize,
  pending_exception: Option<Value>,
  cleanup_hooks: Vec<(CleanupHookId, CleanupHook)>,
  next_cleanup_hook: u32,
  closing: bool,
}

impl Environment {
  pub fn new(scheduler: AsyncWorkScheduler) -> Self {
    let (completion_tx, completion_rx) = mpsc::channel();
    let id = EnvId(NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed));
    debug!(env = %id, "created environment");
    Self {
      id,
      last_error: ExtendedErrorInfo::ok(),
      instance_data: InstanceDataSlot::default(),
      references: ReferenceTable::default(),
      works: Slots::default(),
      scheduler,
      completion_tx,
      completion_rx,
      in_flight: 0,
      pending_exception: None,
      cleanup_hooks: Vec::new(),
      next_cleanup_hook: 0,
      closing: false,
    }
  }

  pub fn id(&self) -> EnvId {
    self.id
  }

  pub fn scheduler(&self) -> &AsyncWorkScheduler {
    &self.scheduler
  }

  // Error state.

  /// Overwrites the latched error and returns `error_code` unchanged.
  pub fn set_last_error(
    &mut self,
    error_code: Status,
    engine_error_code: u32,
    engine_reserved: *mut c_void,
  ) -> Status {
    self.last_error.error_code = error_code;
    self.last_error.engine_error_code = engine_error_code;
    self.last_error.engine_reserved = engine_reserved;
    error_code
  }

  pub fn clear_last_error(&mut self) -> Status {
    self.last_error = ExtendedErrorInfo::ok();
    Status::Ok
  }

  /// Returns the latched error with its message resolved.
  ///
  /// An `Ok` state is reset as a side effect. Any other code stays latched until the next
  /// operation overwrites it.
  pub fn get_last_error_info(&mut self) -> &ExtendedErrorInfo {
    self.last_error.error_message = self.last_error.error_code.message();
    if self.last_error.error_code.is_ok() {
      self.clear_last_error();
    }
    &self.last_error
  }

  /// The latched code, without resolving the message.
  pub fn last_status(&self) -> Status {
    self.last_error.error_code
  }

  fn latch<T>(&mut self, result: NapiResult<T>) -> NapiResult<T> {
    match &result {
      Ok(_) => {
        self.clear_last_error();
      }
      Err(err) => {
        trace!(env = %self.id, status = ?err.status(), "operation failed");
        self.set_last_error(err.status(), 0, ptr::null_mut());
      }
    }
    result
  }

  // Instance data.

  /// Replaces the instance data, synchronously finalizing the previous occupant first.
  pub fn set_instance_data<T: 'static>(
    &mut self,
    data: T,
    finalize_cb: Option<FinalizeCallback<T>>,
    finalize_hint: Option<Box<dyn Any>>,
  ) -> NapiResult<()> {
    // A finalizer may itself install data; that occupancy is finalized too.
    while let Some(previous) = self.instance_data.take() {
      previous.finalize(self);
    }
    self.instance_data.install(data, finalize_cb, finalize_hint);
    self.latch(Ok(()))
  }

  /// Returns the instance data, or `None` if the slot is empty or holds another type.
  pub fn get_instance_data<T: 'static>(&mut self) -> NapiResult<Option<&T>> {
    self.clear_last_error();
    Ok(self.instance_data.get::<T>())
  }

  pub fn instance_data_mut<T: 'static>(&mut self) -> NapiResult<Option<&mut T>> {
    self.clear_last_error();
    Ok(self.instance_data.get_mut::<T>())
  }

  // References.

  pub fn create_reference(&mut self, value: &Value, initial_count: u32) -> NapiResult<ReferenceId> {
    let result = self.references.create(value, initial_count);
    self.latch(result)
  }

  pub fn delete_reference(&mut self, reference: ReferenceId) -> NapiResult<()> {
    let result = self.references.delete(reference);
    self.latch(result)
  }

  pub fn reference_ref(&mut self, reference: ReferenceId) -> NapiResult<u32> {
    let result = self.references.reference_ref(reference);
    self.latch(result)
  }

  pub fn reference_unref(&mut self, reference: ReferenceId) -> NapiResult<u32> {
    let result = self.references.reference_unref(reference);
    self.latch(result)
  }

  pub fn reference_count(&mut self, reference: ReferenceId) -> NapiResult<u32> {
    let result = self.references.count(reference);
    self.latch(result)
  }

  pub fn get_reference_value(&mut self, reference: ReferenceId) -> NapiResult<Value> {
    let result = self.references.value(reference);
    self.latch(result)
  }

  // Async work.

  /// Allocates a work item in the `Created` state. Nothing runs until it is queued.
  ///
  /// `execute` runs on a worker thread with exclusive access to `data`. `complete` then runs on
  /// this environment's logical thread, exactly once, with [`Status::Ok`] or
  /// [`Status::Cancelled`]. It is responsible for calling
  /// [`delete_async_work`](Self::delete_async_work); the item is never deleted automatically.
  pub fn create_async_work<D, E, C>(
    &mut self,
    resource_name: &str,
    data: D,
    execute: E,
    complete: C,
  ) -> NapiResult<WorkId>
  where
    D: Send + 'static,
    E: FnOnce(&mut D) + Send + 'static,
    C: FnOnce(&mut Environment, WorkId, Status, D) + Send + 'static,
  {
    let item = WorkItem::new(resource_name, boxed_task(data, execute, complete));
    let work = WorkId(self.works.insert(item));
    debug!(env = %self.id, work = ?work, resource = resource_name, "created async work");
    self.latch(Ok(work))
  }

  pub fn queue_async_work(&mut self, work: WorkId) -> NapiResult<()> {
    let result = self.queue_work_inner(work);
    self.latch(result)
  }

  fn queue_work_inner(&mut self, work: WorkId) -> NapiResult<()> {
    if self.closing {
      warn!(env = %self.id, work = ?work, "refusing to queue async work during teardown");
      return Err(NapiError::generic_failure());
    }
    let item = self.works.get_mut(work.0).ok_or_else(NapiError::invalid_arg)?;
    if item.state.load() != WorkState::Created {
      return Err(NapiError::generic_failure());
    }
    let task = item.task.take().ok_or_else(NapiError::generic_failure)?;
    item.state.store(WorkState::Queued);
    item.awaiting_completion = true;
    let job = Job {
      env: self.id,
      work,
      resource_name: item.resource_name.clone(),
      state: item.state.clone(),
      task,
      completions: self.completion_tx.clone(),
    };
    self.in_flight += 1;
    self.scheduler.submit(job);
    Ok(())
  }

  /// Cancels an item that no worker has started yet.
  ///
  /// On success the item's `complete` callback is scheduled with [`Status::Cancelled`] and runs
  /// during the next completion drain. Fails with [`Status::GenericFailure`] once the item has
  /// been dispatched, in which case the normal completion still follows.
  pub fn cancel_async_work(&mut self, work: WorkId) -> NapiResult<()> {
    let result = self.cancel_work_inner(work);
    self.latch(result)
  }

  fn cancel_work_inner(&mut self, work: WorkId) -> NapiResult<()> {
    if !self.works.contains(work.0) {
      return Err(NapiError::invalid_arg());
    }
    let job = self
      .scheduler
      .cancel(self.id, work)
      .ok_or_else(NapiError::generic_failure)?;
    debug!(env = %self.id, work = ?work, resource = %job.resource_name, "cancelled async work");
    self.post_cancelled(job);
    Ok(())
  }

  fn post_cancelled(&self, job: Job) {
    let completion = Completion {
      work: job.work,
      status: Status::Cancelled,
      task: job.task,
    };
    // The receiver lives in `self`, so the channel cannot be disconnected here.
    let _ = self.completion_tx.send(completion);
  }

  /// Releases a work item.
  ///
  /// Valid for an item that was never queued (its callbacks are dropped without running) and for
  /// an item whose completion has been delivered, including from inside `complete`. An item that
  /// is still queued, running, or awaiting delivery cannot be deleted.
  pub fn delete_async_work(&mut self, work: WorkId) -> NapiResult<()> {
    let result = self.delete_work_inner(work);
    self.latch(result)
  }

  fn delete_work_inner(&mut self, work: WorkId) -> NapiResult<()> {
    let item = self.works.get(work.0).ok_or_else(NapiError::invalid_arg)?;
    if item.awaiting_completion {
      return Err(NapiError::generic_failure());
    }
    self.works.remove(work.0);
    trace!(env = %self.id, work = ?work, "deleted async work");
    Ok(())
  }

  pub fn work_state(&mut self, work: WorkId) -> NapiResult<WorkState> {
    let result = self
      .works
      .get(work.0)
      .map(|item| item.state.load())
      .ok_or_else(NapiError::invalid_arg);
    self.latch(result)
  }

  /// Items queued (or cancelled) whose completion has not been delivered yet.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// Delivers every completion that has already arrived, without blocking.
  ///
  /// Completions are delivered in the order workers finished them. If a `complete` callback
  /// leaves an exception pending, draining **continues**; the exceptions are returned to the
  /// caller for reporting.
  pub fn run_completions(&mut self) -> Vec<Value> {
    let mut uncaught = Vec::new();
    while let Ok(completion) = self.completion_rx.try_recv() {
      self.deliver(completion, &mut uncaught);
    }
    uncaught
  }

  /// Blocks until at least one completion arrives, then drains like
  /// [`run_completions`](Self::run_completions). Returns immediately if nothing is in flight.
  pub fn wait_for_completion(&mut self) -> Vec<Value> {
    let mut uncaught = Vec::new();
    if self.in_flight == 0 {
      return uncaught;
    }
    if let Ok(completion) = self.completion_rx.recv() {
      self.deliver(completion, &mut uncaught);
    }
    uncaught.extend(self.run_completions());
    uncaught
  }

  /// Delivers completions until no item is in flight, including items queued by `complete`
  /// callbacks along the way.
  pub fn run_until_idle(&mut self) -> Vec<Value> {
    let mut uncaught = self.run_completions();
    while self.in_flight > 0 {
      uncaught.extend(self.wait_for_completion());
    }
    uncaught
  }

  fn deliver(&mut self, completion: Completion, uncaught: &mut Vec<Value>) {
    let Completion { work, status, task } = completion;
    self.in_flight -= 1;
    let resource_name = match self.works.get_mut(work.0) {
      Some(item) => {
        item.awaiting_completion = false;
        item.resource_name.clone()
      }
      None => "".into(),
    };

    let span = debug_span!(
      "complete",
      env = %self.id,
      work = ?work,
      resource = %resource_name,
      ?status
    );
    let _entered = span.enter();
    task.complete(self, work, status);
    if let Some(exception) = self.pending_exception.take() {
      warn!(?exception, "async work completion left an exception pending");
      uncaught.push(exception);
    }
  }

  // Exceptions.

  pub fn throw(&mut self, error: Value) -> NapiResult<()> {
    let result = if self.pending_exception.is_some() {
      Err(NapiError::new(Status::PendingException))
    } else {
      self.pending_exception = Some(error);
      Ok(())
    };
    self.latch(result)
  }

  pub fn throw_error(&mut self, code: Option<&str>, msg: &str) -> NapiResult<()> {
    self.throw_kind(ErrorKind::Error, code, msg)
  }

  pub fn throw_type_error(&mut self, code: Option<&str>, msg: &str) -> NapiResult<()> {
    self.throw_kind(ErrorKind::TypeError, code, msg)
  }

  pub fn throw_range_error(&mut self, code: Option<&str>, msg: &str) -> NapiResult<()> {
    self.throw_kind(ErrorKind::RangeError, code, msg)
  }

  fn throw_kind(&mut self, kind: ErrorKind, code: Option<&str>, msg: &str) -> NapiResult<()> {
    if self.pending_exception.is_some() {
      return self.latch(Err(NapiError::new(Status::PendingException)));
    }
    self.throw(Value::error(kind, msg, code))
  }

  pub fn is_exception_pending(&mut self) -> bool {
    self.clear_last_error();
    self.pending_exception.is_some()
  }

  pub fn get_and_clear_last_exception(&mut self) -> Option<Value> {
    self.clear_last_error();
    self.pending_exception.take()
  }

  /// Calls a host function with `recv` as `this`.
  ///
  /// A thrown value stays pending on the environment and the call fails with
  /// [`Status::PendingException`].
  pub fn call_function(&mut self, recv: &Value, func: &Value, args: &[Value]) -> NapiResult<Value> {
    let result = self.call_function_inner(recv, func, args);
    self.latch(result)
  }

  fn call_function_inner(&mut self, recv: &Value, func: &Value, args: &[Value]) -> NapiResult<Value> {
    if self.pending_exception.is_some() {
      return Err(NapiError::new(Status::PendingException));
    }
    let call = func
      .as_object()
      .and_then(JsObject::host_function)
      .ok_or_else(|| NapiError::new(Status::FunctionExpected))?;
    match call(self, recv, args) {
      Ok(_) if self.pending_exception.is_some() => Err(NapiError::new(Status::PendingException)),
      Ok(value) => Ok(value),
      Err(thrown) => {
        self.pending_exception = Some(thrown);
        Err(NapiError::new(Status::PendingException))
      }
    }
  }

  // Teardown.

  pub fn add_env_cleanup_hook(&mut self, hook: CleanupHook) -> CleanupHookId {
    let id = CleanupHookId(self.next_cleanup_hook);
    self.next_cleanup_hook += 1;
    self.cleanup_hooks.push((id, hook));
    self.clear_last_error();
    id
  }

  pub fn remove_env_cleanup_hook(&mut self, id: CleanupHookId) -> NapiResult<()> {
    let result = match self.cleanup_hooks.iter().position(|(hook_id, _)| *hook_id == id) {
      Some(position) => {
        drop(self.cleanup_hooks.remove(position));
        Ok(())
      }
      None => Err(NapiError::invalid_arg()),
    };
    self.latch(result)
  }

  /// Tears the environment down.
  ///
  /// Still-queued work is cancelled, running work is waited for, and every outstanding
  /// completion is delivered. Then cleanup hooks run in reverse registration order, the instance
  /// data is finalized, and any remaining references are released. Dropping an environment does
  /// the same.
  pub fn teardown(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    if self.closing {
      return;
    }
    self.closing = true;
    debug!(env = %self.id, in_flight = self.in_flight, "tearing down environment");

    for job in self.scheduler.cancel_all(self.id) {
      self.post_cancelled(job);
    }
    let uncaught = self.run_until_idle();
    if !uncaught.is_empty() {
      warn!(env = %self.id, count = uncaught.len(), "exceptions left pending during teardown");
    }

    while let Some((_, hook)) = self.cleanup_hooks.pop() {
      hook(self);
    }

    while let Some(data) = self.instance_data.take() {
      data.finalize(self);
    }

    let leaked = self.references.clear();
    if leaked > 0 {
      debug!(env = %self.id, leaked, "released references still held at teardown");
    }
    self.pending_exception = None;
  }
}

impl Drop for Environment {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use super::*;
  use crate::scheduler::SchedulerOptions;

  fn env() -> Environment {
    let scheduler = AsyncWorkScheduler::new(SchedulerOptions {
      worker_threads: 1,
      ..SchedulerOptions::default()
    })
    .unwrap();
    Environment::new(scheduler)
  }

  #[test]
  fn latch_agrees_with_return_value() {
    let mut env = env();
    let err = env.create_reference(&Value::Null, 1).unwrap_err();
    assert_eq!(env.last_status(), err.status());
    assert!(env.create_reference(&Value::object(), 1).is_ok());
    assert_eq!(env.last_status(), Status::Ok);
  }

  #[test]
  fn environment_ids_are_unique() {
    let a = env();
    let b = env();
    assert_ne!(a.id(), b.id());
    assert!(a.id().to_string().starts_with("env#"));
  }

  #[test]
  fn removed_cleanup_hook_is_dropped_without_running() {
    let ran = Rc::new(Cell::new(0));
    let mut env = env();
    let kept = Rc::clone(&ran);
    env.add_env_cleanup_hook(Box::new(move |_: &mut Environment| kept.set(kept.get() + 1)));
    let removed_ran = Rc::clone(&ran);
    let removed = env.add_env_cleanup_hook(Box::new(move |_: &mut Environment| {
      removed_ran.set(removed_ran.get() + 100)
    }));
    assert_eq!(Rc::strong_count(&ran), 3);

    env.remove_env_cleanup_hook(removed).unwrap();
    assert_eq!(Rc::strong_count(&ran), 2);
    assert_eq!(
      env.remove_env_cleanup_hook(removed).unwrap_err().status(),
      Status::InvalidArg
    );

    env.teardown();
    assert_eq!(ran.get(), 1);
  }

  #[test]
  fn throw_while_pending_reports_pending_exception() {
    let mut env = env();
    env.throw_error(None, "first").unwrap();
    assert_eq!(
      env.throw_type_error(None, "second").unwrap_err().status(),
      Status::PendingException
    );
    let exception = env.get_and_clear_last_exception().unwrap();
    assert_eq!(exception.as_object().unwrap().error_message(), Some("first"));
    assert!(!env.is_exception_pending());
  }
}

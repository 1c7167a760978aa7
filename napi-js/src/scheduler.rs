//! Fixed-size worker pool for async work.
//!
//! The pending queue is the only structure workers share with the logical threads. A worker pops
//! the next job and marks it `Running` under the queue lock, so cancellation (which also takes the
//! lock) observes either a queued job it can remove, or a dispatched job it must leave alone.
//! Finished jobs go back to their environment over that environment's completion channel.

use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use parking_lot::Condvar;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::env::EnvId;
use crate::status::Status;
use crate::work::Completion;
use crate::work::SharedState;
use crate::work::Task;
use crate::work::WorkId;
use crate::work::WorkState;

/// libuv's default pool size.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// libuv's upper bound on `UV_THREADPOOL_SIZE`.
pub const MAX_WORKER_THREADS: usize = 1024;

/// Construction-time scheduler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
  pub worker_threads: usize,
  /// Prefix for worker thread names; the worker index is appended.
  pub thread_name: String,
}

impl Default for SchedulerOptions {
  fn default() -> Self {
    Self {
      worker_threads: DEFAULT_WORKER_THREADS,
      thread_name: "napi-worker".to_string(),
    }
  }
}

impl SchedulerOptions {
  /// Defaults, with the pool size taken from `UV_THREADPOOL_SIZE` when it is set to a positive
  /// integer. Values above [`MAX_WORKER_THREADS`] are clamped.
  pub fn from_env() -> Self {
    let mut options = Self::default();
    if let Some(size) = std::env::var("UV_THREADPOOL_SIZE")
      .ok()
      .and_then(|raw| parse_pool_size(&raw))
    {
      options.worker_threads = size;
    }
    options
  }
}

fn parse_pool_size(raw: &str) -> Option<usize> {
  match raw.trim().parse::<usize>() {
    Ok(0) | Err(_) => None,
    Ok(size) => Some(size.min(MAX_WORKER_THREADS)),
  }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  #[error("worker pool must have at least one thread")]
  NoWorkers,

  #[error("worker pool size {0} exceeds the maximum of {max}", max = MAX_WORKER_THREADS)]
  TooManyWorkers(usize),

  #[error("failed to spawn worker thread: {0}")]
  Spawn(#[from] io::Error),
}

/// A queued unit of work as the pool sees it.
pub(crate) struct Job {
  pub env: EnvId,
  pub work: WorkId,
  pub resource_name: Arc<str>,
  pub state: SharedState,
  pub task: Box<dyn Task>,
  pub completions: Sender<Completion>,
}

struct QueueState {
  pending: VecDeque<Job>,
  shutdown: bool,
}

struct Shared {
  queue: Mutex<QueueState>,
  available: Condvar,
}

struct WorkerPool {
  shared: Arc<Shared>,
  threads: Mutex<Vec<JoinHandle<()>>>,
  size: usize,
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    {
      let mut queue = self.shared.queue.lock();
      queue.shutdown = true;
      self.shared.available.notify_all();
    }

    for handle in self.threads.lock().drain(..) {
      let _ = handle.join();
    }
  }
}

/// Handle to a shared worker pool.
///
/// Cloning is cheap; every clone refers to the same pool. The pool shuts down and joins its
/// workers when the last handle is dropped.
#[derive(Clone)]
pub struct AsyncWorkScheduler {
  shared: Arc<Shared>,
  pool: Arc<WorkerPool>,
}

impl AsyncWorkScheduler {
  pub fn new(options: SchedulerOptions) -> Result<Self, SchedulerError> {
    if options.worker_threads == 0 {
      return Err(SchedulerError::NoWorkers);
    }
    if options.worker_threads > MAX_WORKER_THREADS {
      return Err(SchedulerError::TooManyWorkers(options.worker_threads));
    }

    let shared = Arc::new(Shared {
      queue: Mutex::new(QueueState {
        pending: VecDeque::new(),
        shutdown: false,
      }),
      available: Condvar::new(),
    });
    // Built before spawning so that a failed spawn still shuts down the threads already started.
    let pool = WorkerPool {
      shared: Arc::clone(&shared),
      threads: Mutex::new(Vec::with_capacity(options.worker_threads)),
      size: options.worker_threads,
    };
    for index in 0..options.worker_threads {
      let worker_shared = Arc::clone(&shared);
      let handle = thread::Builder::new()
        .name(format!("{}-{index}", options.thread_name))
        .spawn(move || worker_main(worker_shared))?;
      pool.threads.lock().push(handle);
    }
    debug!(
      worker_threads = options.worker_threads,
      "started async work pool"
    );

    Ok(Self {
      shared,
      pool: Arc::new(pool),
    })
  }

  pub fn worker_threads(&self) -> usize {
    self.pool.size
  }

  /// Number of jobs waiting for a free worker, across all environments.
  pub fn pending(&self) -> usize {
    self.shared.queue.lock().pending.len()
  }

  pub(crate) fn submit(&self, job: Job) {
    trace!(env = %job.env, work = ?job.work, resource = %job.resource_name, "queued async work");
    let mut queue = self.shared.queue.lock();
    queue.pending.push_back(job);
    self.shared.available.notify_one();
  }

  /// Removes a job that no worker has picked up yet and marks it `Cancelled`.
  ///
  /// Returns `None` if the job is not in the pending queue, i.e. it was already dispatched.
  pub(crate) fn cancel(&self, env: EnvId, work: WorkId) -> Option<Job> {
    let mut queue = self.shared.queue.lock();
    let position = queue
      .pending
      .iter()
      .position(|job| job.env == env && job.work == work)?;
    let job = queue.pending.remove(position)?;
    job.state.store(WorkState::Cancelled);
    Some(job)
  }

  /// Cancels every pending job of `env`, in queue order.
  pub(crate) fn cancel_all(&self, env: EnvId) -> Vec<Job> {
    let mut queue = self.shared.queue.lock();
    let (cancelled, kept): (VecDeque<Job>, VecDeque<Job>) =
      queue.pending.drain(..).partition(|job| job.env == env);
    queue.pending = kept;
    cancelled
      .into_iter()
      .map(|job| {
        job.state.store(WorkState::Cancelled);
        job
      })
      .collect()
  }

  #[cfg(test)]
  fn live_workers(&self) -> usize {
    self.pool.threads.lock().len()
  }
}

/// Aborts the process if dropped while the worker is unwinding out of `execute`.
///
/// A panic on a worker cannot be turned into a JavaScript exception, so it must not escape as a
/// normal completion either.
struct AbortOnUnwind<'a> {
  env: EnvId,
  work: WorkId,
  resource_name: &'a str,
}

impl Drop for AbortOnUnwind<'_> {
  fn drop(&mut self) {
    if thread::panicking() {
      error!(
        env = %self.env,
        work = ?self.work,
        resource = %self.resource_name,
        "async work execute step panicked; aborting"
      );
      std::process::abort();
    }
  }
}

fn worker_main(shared: Arc<Shared>) {
  loop {
    let job = {
      let mut queue = shared.queue.lock();
      loop {
        if let Some(job) = queue.pending.pop_front() {
          job.state.store(WorkState::Running);
          break job;
        }
        if queue.shutdown {
          return;
        }
        shared.available.wait(&mut queue);
      }
    };

    let Job {
      env,
      work,
      resource_name,
      state,
      mut task,
      completions,
    } = job;
    trace!(env = %env, work = ?work, resource = %resource_name, "running async work");
    {
      let _guard = AbortOnUnwind {
        env,
        work,
        resource_name: &resource_name,
      };
      task.execute();
    }
    state.store(WorkState::Completed);

    let completion = Completion {
      work,
      status: Status::Ok,
      task,
    };
    if completions.send(completion).is_err() {
      debug!(env = %env, work = ?work, "environment gone; dropping completion");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_size_parsing() {
    assert_eq!(parse_pool_size("8"), Some(8));
    assert_eq!(parse_pool_size(" 2 "), Some(2));
    assert_eq!(parse_pool_size("0"), None);
    assert_eq!(parse_pool_size("-1"), None);
    assert_eq!(parse_pool_size("lots"), None);
    assert_eq!(parse_pool_size("100000"), Some(MAX_WORKER_THREADS));
  }

  #[test]
  fn zero_workers_is_rejected() {
    let options = SchedulerOptions {
      worker_threads: 0,
      ..SchedulerOptions::default()
    };
    assert!(matches!(
      AsyncWorkScheduler::new(options),
      Err(SchedulerError::NoWorkers)
    ));
  }

  #[test]
  fn oversized_pool_is_rejected_before_spawning() {
    let options = SchedulerOptions {
      worker_threads: MAX_WORKER_THREADS + 1,
      ..SchedulerOptions::default()
    };
    match AsyncWorkScheduler::new(options) {
      Err(err @ SchedulerError::TooManyWorkers(1025)) => {
        assert_eq!(
          err.to_string(),
          "worker pool size 1025 exceeds the maximum of 1024"
        );
      }
      Err(err) => panic!("unexpected error: {err}"),
      Ok(_) => panic!("pool above the maximum was accepted"),
    }
  }

  #[test]
  fn spawns_the_requested_number_of_workers() {
    let scheduler = AsyncWorkScheduler::new(SchedulerOptions {
      worker_threads: 3,
      ..SchedulerOptions::default()
    })
    .unwrap();
    assert_eq!(scheduler.worker_threads(), 3);
    assert_eq!(scheduler.live_workers(), 3);
    assert_eq!(scheduler.pending(), 0);
  }
}

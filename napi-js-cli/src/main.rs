use clap::{Args, Parser, Subcommand};
use napi_js::{AsyncWorkScheduler, Environment, SchedulerOptions, Status, WorkId};
use serde::Serialize;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Async work scheduler driver")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Queue a batch of work items, optionally cancel some, and drain every completion.
  Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
  /// Number of work items to queue.
  #[arg(long, default_value_t = 16)]
  jobs: u32,

  /// Worker pool size. Defaults to UV_THREADPOOL_SIZE, or 4.
  #[arg(long)]
  threads: Option<usize>,

  /// Time each execute step sleeps before producing its result.
  #[arg(long, default_value_t = 10)]
  sleep_ms: u64,

  /// Try to cancel this many of the most recently queued items.
  #[arg(long, default_value_t = 0)]
  cancel: u32,

  /// Emit the report as JSON.
  #[arg(long)]
  json: bool,

  /// Emit tracing events (JSON) to stderr. Filtered by RUST_LOG.
  #[arg(long)]
  trace: bool,
}

/// Accumulated in the environment's instance data by the completion callbacks.
#[derive(Default, Serialize)]
struct Report {
  jobs: u32,
  worker_threads: usize,
  completed: u32,
  cancelled: u32,
  cancel_failed: u32,
  wrong_outputs: u32,
  uncaught_exceptions: usize,
  elapsed_ms: u128,
}

struct Job {
  input: u64,
  output: Option<u64>,
  sleep: Duration,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  match cli.command {
    Commands::Run(args) => run(args),
  }
}

fn init_tracing(enabled: bool) {
  if !enabled {
    return;
  }
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
  if let Err(err) = tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_span_events(FmtSpan::CLOSE)
    .with_writer(std::io::stderr)
    .json()
    .with_ansi(false)
    .try_init()
  {
    eprintln!("failed to install tracing subscriber: {err}");
  }
}

fn complete_job(env: &mut Environment, work: WorkId, status: Status, job: Job) {
  if let Ok(Some(report)) = env.instance_data_mut::<Report>() {
    match (status, job.output) {
      (Status::Cancelled, _) => report.cancelled += 1,
      (_, Some(output)) if output == job.input * 2 => report.completed += 1,
      _ => report.wrong_outputs += 1,
    }
  }
  if let Err(err) = env.delete_async_work(work) {
    eprintln!("failed to delete work {work:?}: {err}");
  }
}

fn run(args: RunArgs) -> ExitCode {
  init_tracing(args.trace);

  let mut options = SchedulerOptions::from_env();
  if let Some(threads) = args.threads {
    options.worker_threads = threads;
  }
  let scheduler = match AsyncWorkScheduler::new(options) {
    Ok(scheduler) => scheduler,
    Err(err) => {
      eprintln!("error: {err}");
      return ExitCode::from(2);
    }
  };
  let mut env = Environment::new(scheduler.clone());
  let report = Report {
    jobs: args.jobs,
    worker_threads: scheduler.worker_threads(),
    ..Report::default()
  };
  if let Err(err) = env.set_instance_data(report, None, None) {
    eprintln!("error: {err}");
    return ExitCode::FAILURE;
  }

  let started = Instant::now();
  let mut queued = Vec::with_capacity(args.jobs as usize);
  for input in 0..u64::from(args.jobs) {
    let job = Job {
      input,
      output: None,
      sleep: Duration::from_millis(args.sleep_ms),
    };
    let work = env.create_async_work(
      "CliJob",
      job,
      |job: &mut Job| {
        thread::sleep(job.sleep);
        job.output = Some(job.input * 2);
      },
      complete_job,
    );
    match work.and_then(|work| env.queue_async_work(work).map(|()| work)) {
      Ok(work) => queued.push(work),
      Err(err) => {
        eprintln!("failed to queue job {input}: {err}");
        return ExitCode::FAILURE;
      }
    }
  }
  debug!(queued = queued.len(), pending = scheduler.pending(), "queued jobs");

  let mut cancel_failed = 0;
  for work in queued.iter().rev().take(args.cancel as usize) {
    if env.cancel_async_work(*work).is_err() {
      cancel_failed += 1;
    }
  }

  let uncaught = env.run_until_idle();
  let elapsed = started.elapsed();

  let Ok(Some(report)) = env.instance_data_mut::<Report>() else {
    eprintln!("error: report missing from instance data");
    return ExitCode::FAILURE;
  };
  report.cancel_failed = cancel_failed;
  report.uncaught_exceptions = uncaught.len();
  report.elapsed_ms = elapsed.as_millis();
  info!(
    completed = report.completed,
    cancelled = report.cancelled,
    cancel_failed = report.cancel_failed,
    "drained all completions"
  );

  if args.json {
    match serde_json::to_string_pretty(&*report) {
      Ok(serialized) => println!("{serialized}"),
      Err(err) => {
        eprintln!("failed to serialize JSON: {err}");
        return ExitCode::FAILURE;
      }
    }
  } else {
    println!(
      "{} jobs on {} workers in {}ms: {} completed, {} cancelled, {} could not be cancelled",
      report.jobs,
      report.worker_threads,
      report.elapsed_ms,
      report.completed,
      report.cancelled,
      report.cancel_failed,
    );
  }

  let ok = report.wrong_outputs == 0
    && report.uncaught_exceptions == 0
    && report.completed + report.cancelled == report.jobs;
  if ok {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  }
}

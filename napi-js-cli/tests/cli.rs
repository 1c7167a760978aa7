use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::time::Duration;

fn napi_js() -> Command {
  let mut cmd = Command::cargo_bin("napi-js").unwrap();
  cmd.timeout(Duration::from_secs(30)).env_remove("UV_THREADPOOL_SIZE");
  cmd
}

fn parse_stdout_json(stdout: &[u8]) -> Value {
  serde_json::from_slice(stdout).expect("stdout should be valid JSON")
}

#[test]
fn json_report_accounts_for_every_job() {
  let assert = napi_js()
    .args([
      "run",
      "--jobs",
      "8",
      "--threads",
      "2",
      "--sleep-ms",
      "20",
      "--cancel",
      "4",
      "--json",
    ])
    .assert()
    .success();

  let report = parse_stdout_json(&assert.get_output().stdout);
  assert_eq!(report["jobs"], 8);
  assert_eq!(report["worker_threads"], 2);
  assert_eq!(report["wrong_outputs"], 0);
  assert_eq!(report["uncaught_exceptions"], 0);
  assert!(report["elapsed_ms"].is_u64());

  let completed = report["completed"].as_u64().unwrap();
  let cancelled = report["cancelled"].as_u64().unwrap();
  let cancel_failed = report["cancel_failed"].as_u64().unwrap();
  assert_eq!(completed + cancelled, 8, "{report}");
  assert_eq!(cancelled + cancel_failed, 4, "{report}");
  // At most two jobs are running when the cancels are issued.
  assert!(cancelled >= 2, "{report}");
}

#[test]
fn text_summary_without_cancellation() {
  napi_js()
    .args(["run", "--jobs", "3", "--threads", "1", "--sleep-ms", "0"])
    .assert()
    .success()
    .stdout(contains("3 jobs on 1 workers"))
    .stdout(contains("3 completed, 0 cancelled, 0 could not be cancelled"));
}

#[test]
fn pool_size_falls_back_to_the_environment() {
  let assert = napi_js()
    .env("UV_THREADPOOL_SIZE", "3")
    .args(["run", "--jobs", "2", "--sleep-ms", "0", "--json"])
    .assert()
    .success();

  let report = parse_stdout_json(&assert.get_output().stdout);
  assert_eq!(report["worker_threads"], 3);
  assert_eq!(report["completed"], 2);
}

#[test]
fn empty_pool_is_rejected() {
  napi_js()
    .args(["run", "--jobs", "1", "--threads", "0"])
    .assert()
    .failure()
    .code(2)
    .stderr(contains("worker pool must have at least one thread"));
}

#[test]
fn oversized_pool_is_rejected() {
  napi_js()
    .args(["run", "--jobs", "1", "--threads", "100000"])
    .assert()
    .failure()
    .code(2)
    .stderr(contains("exceeds the maximum of 1024"));
}

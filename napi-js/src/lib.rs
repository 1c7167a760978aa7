//! Core runtime state for a native addon host.
//!
//! This crate provides the stateful parts an addon host must get right:
//! - A latched, per-environment error record ([`Environment::get_last_error_info`])
//! - One slot of environment-scoped instance data with a finalizer
//!   ([`Environment::set_instance_data`])
//! - Refcounted references that keep values alive across an async boundary ([`ReferenceId`])
//! - Async work: an execute step on a bounded worker pool ([`AsyncWorkScheduler`]) and a
//!   complete step marshaled back onto the environment's logical thread ([`WorkId`])
//!
//! # Threading
//!
//! An [`Environment`] is pinned to the thread that created it. Only `execute` steps run elsewhere,
//! and they see nothing but their own data. Each environment drains its own completion channel
//! with [`Environment::run_completions`] / [`Environment::run_until_idle`]; workers never call
//! back into an environment directly.
//!
//! # Errors
//!
//! Every fallible operation returns [`NapiResult`] and latches the outcome, so the return value
//! and [`Environment::last_status`] always agree when the call returns. A panic inside an
//! `execute` step aborts the process on the worker thread.

mod env;
mod error;
mod instance_data;
mod reference;
mod scheduler;
mod slots;
mod status;
mod value;
mod work;

pub use crate::env::CleanupHook;
pub use crate::env::CleanupHookId;
pub use crate::env::EnvId;
pub use crate::env::Environment;
pub use crate::error::NapiError;
pub use crate::error::NapiResult;
pub use crate::instance_data::FinalizeCallback;
pub use crate::reference::ReferenceId;
pub use crate::scheduler::AsyncWorkScheduler;
pub use crate::scheduler::SchedulerError;
pub use crate::scheduler::SchedulerOptions;
pub use crate::scheduler::DEFAULT_WORKER_THREADS;
pub use crate::scheduler::MAX_WORKER_THREADS;
pub use crate::slots::SlotId;
pub use crate::status::message_for_raw;
pub use crate::status::ExtendedErrorInfo;
pub use crate::status::Status;
pub use crate::value::ErrorKind;
pub use crate::value::HostFunction;
pub use crate::value::JsObject;
pub use crate::value::ObjectKind;
pub use crate::value::Value;
pub use crate::value::WeakJsObject;
pub use crate::work::WorkId;
pub use crate::work::WorkState;

use crate::status::Status;

/// A failed host operation.
///
/// Wraps a non-`Ok` [`Status`]. The same code is latched into the environment's last-error state
/// when the operation returns, so callers may either match on this value or poll
/// [`Environment::get_last_error_info`](crate::Environment::get_last_error_info).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{status}")]
pub struct NapiError {
  status: Status,
}

impl NapiError {
  /// Panics in debug builds if `status` is [`Status::Ok`].
  pub fn new(status: Status) -> Self {
    debug_assert!(!status.is_ok(), "NapiError cannot carry Status::Ok");
    Self { status }
  }

  pub fn invalid_arg() -> Self {
    Self::new(Status::InvalidArg)
  }

  pub fn generic_failure() -> Self {
    Self::new(Status::GenericFailure)
  }

  pub fn status(&self) -> Status {
    self.status
  }
}

impl From<NapiError> for Status {
  fn from(err: NapiError) -> Self {
    err.status
  }
}

pub type NapiResult<T> = Result<T, NapiError>;

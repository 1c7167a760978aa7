use core::fmt;
use std::ffi::c_void;
use std::ptr;

/// Status codes returned by every host operation.
///
/// The discriminants match the N-API `napi_status` values so that codes can cross an FFI boundary
/// unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum Status {
  Ok = 0,
  InvalidArg,
  ObjectExpected,
  StringExpected,
  NameExpected,
  FunctionExpected,
  NumberExpected,
  BooleanExpected,
  ArrayExpected,
  GenericFailure,
  PendingException,
  Cancelled,
  EscapeCalledTwice,
  HandleScopeMismatch,
  CallbackScopeMismatch,
  QueueFull,
  Closing,
  BigintExpected,
  DateExpected,
  ArraybufferExpected,
  DetachableArraybufferExpected,
  WouldDeadlock,
}

impl Status {
  /// Number of defined status codes.
  pub const COUNT: usize = Status::WouldDeadlock as usize + 1;

  const ALL: [Status; Status::COUNT] = [
    Status::Ok,
    Status::InvalidArg,
    Status::ObjectExpected,
    Status::StringExpected,
    Status::NameExpected,
    Status::FunctionExpected,
    Status::NumberExpected,
    Status::BooleanExpected,
    Status::ArrayExpected,
    Status::GenericFailure,
    Status::PendingException,
    Status::Cancelled,
    Status::EscapeCalledTwice,
    Status::HandleScopeMismatch,
    Status::CallbackScopeMismatch,
    Status::QueueFull,
    Status::Closing,
    Status::BigintExpected,
    Status::DateExpected,
    Status::ArraybufferExpected,
    Status::DetachableArraybufferExpected,
    Status::WouldDeadlock,
  ];

  /// Converts a raw status code, returning `None` for codes outside the defined set.
  pub fn from_raw(raw: u32) -> Option<Status> {
    Status::ALL.get(raw as usize).copied()
  }

  #[inline]
  pub fn as_raw(self) -> u32 {
    self as u32
  }

  #[inline]
  pub fn is_ok(self) -> bool {
    self == Status::Ok
  }

  /// The fixed human-readable message for this code. `Ok` has no message.
  #[inline]
  pub fn message(self) -> Option<&'static str> {
    ERROR_MESSAGES[self as usize]
  }

  /// Maps `Ok` to `Ok(())` and every other code to a [`NapiError`](crate::NapiError).
  pub fn into_result(self) -> crate::NapiResult<()> {
    match self {
      Status::Ok => Ok(()),
      status => Err(crate::NapiError::new(status)),
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.message().unwrap_or("ok"))
  }
}

static ERROR_MESSAGES: [Option<&str>; Status::COUNT] = [
  None,
  Some("Invalid argument"),
  Some("An object was expected"),
  Some("A string was expected"),
  Some("A string or symbol was expected"),
  Some("A function was expected"),
  Some("A number was expected"),
  Some("A boolean was expected"),
  Some("An array was expected"),
  Some("Unknown failure"),
  Some("An exception is pending"),
  Some("The async work item was cancelled"),
  Some("napi_escape_handle already called on scope"),
  Some("Invalid handle scope usage"),
  Some("Invalid callback scope usage"),
  Some("Thread-safe function queue is full"),
  Some("Thread-safe function handle is closing"),
  Some("A bigint was expected"),
  Some("A date was expected"),
  Some("An arraybuffer was expected"),
  Some("A detachable arraybuffer was expected"),
  Some("Main thread would deadlock"),
];

/// Looks up the message for a raw status code.
///
/// # Panics
///
/// Panics if `raw` is not a defined status code. Callers holding a [`Status`] should use
/// [`Status::message`] instead, which cannot fail.
pub fn message_for_raw(raw: u32) -> Option<&'static str> {
  match Status::from_raw(raw) {
    Some(status) => status.message(),
    None => panic!("undefined status code {raw}"),
  }
}

/// The latched error record of an [`Environment`](crate::Environment).
///
/// `engine_reserved` is an opaque pointer supplied by the engine. It is stored and handed back,
/// never dereferenced or freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedErrorInfo {
  pub error_message: Option<&'static str>,
  pub engine_reserved: *mut c_void,
  pub engine_error_code: u32,
  pub error_code: Status,
}

impl ExtendedErrorInfo {
  pub(crate) fn ok() -> Self {
    Self {
      error_message: None,
      engine_reserved: ptr::null_mut(),
      engine_error_code: 0,
      error_code: Status::Ok,
    }
  }
}

impl Default for ExtendedErrorInfo {
  fn default() -> Self {
    Self::ok()
  }
}

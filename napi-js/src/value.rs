//! Boundary value model.
//!
//! The host engine's value representation is an external collaborator. This module provides the
//! smallest stand-in the runtime core needs: something to keep alive through a reference, and
//! something to call from a completion callback. Object liveness is the liveness of the shared
//! allocation; once every strong owner is gone the value counts as reclaimed by the host.

use core::fmt;
use std::rc::Rc;
use std::rc::Weak;

use crate::env::Environment;

/// Signature of a host function. `Err` carries the thrown value.
pub type HostFunction = dyn Fn(&mut Environment, &Value, &[Value]) -> Result<Value, Value>;

#[derive(Clone, Debug)]
pub enum Value {
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(Rc<str>),
  Object(JsObject),
}

impl Value {
  pub fn string(s: &str) -> Self {
    Value::String(Rc::from(s))
  }

  /// A plain object with no behaviour.
  pub fn object() -> Self {
    Value::Object(JsObject::new(ObjectKind::Plain))
  }

  pub fn function<F>(name: &str, call: F) -> Self
  where
    F: Fn(&mut Environment, &Value, &[Value]) -> Result<Value, Value> + 'static,
  {
    Value::Object(JsObject::new(ObjectKind::Function {
      name: Rc::from(name),
      call: Rc::new(call),
    }))
  }

  pub fn error(kind: ErrorKind, message: &str, code: Option<&str>) -> Self {
    Value::Object(JsObject::new(ObjectKind::Error {
      kind,
      message: Rc::from(message),
      code: code.map(Rc::from),
    }))
  }

  pub fn as_object(&self) -> Option<&JsObject> {
    match self {
      Value::Object(obj) => Some(obj),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// `===` semantics: primitives by value, objects by identity.
  pub fn strict_equals(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
      _ => false,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Error,
  TypeError,
  RangeError,
}

pub enum ObjectKind {
  Plain,
  Function {
    name: Rc<str>,
    call: Rc<HostFunction>,
  },
  Error {
    kind: ErrorKind,
    message: Rc<str>,
    code: Option<Rc<str>>,
  },
}

/// A shared handle to a host object allocation.
#[derive(Clone)]
pub struct JsObject(Rc<ObjectKind>);

impl JsObject {
  fn new(kind: ObjectKind) -> Self {
    Self(Rc::new(kind))
  }

  pub fn kind(&self) -> &ObjectKind {
    &self.0
  }

  pub fn ptr_eq(&self, other: &JsObject) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  pub fn downgrade(&self) -> WeakJsObject {
    WeakJsObject(Rc::downgrade(&self.0))
  }

  /// The error message, if this is an error object.
  pub fn error_message(&self) -> Option<&str> {
    match self.kind() {
      ObjectKind::Error { message, .. } => Some(&**message),
      _ => None,
    }
  }

  pub(crate) fn host_function(&self) -> Option<Rc<HostFunction>> {
    match self.kind() {
      ObjectKind::Function { call, .. } => Some(Rc::clone(call)),
      _ => None,
    }
  }
}

impl fmt::Debug for JsObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind() {
      ObjectKind::Plain => f.write_str("[object Object]"),
      ObjectKind::Function { name, .. } => write!(f, "[Function: {name}]"),
      ObjectKind::Error { kind, message, .. } => write!(f, "{kind:?}: {message}"),
    }
  }
}

/// A non-owning handle to an object allocation.
#[derive(Clone, Debug)]
pub struct WeakJsObject(Weak<ObjectKind>);

impl WeakJsObject {
  /// Returns the object if the host has not reclaimed it yet.
  pub fn upgrade(&self) -> Option<JsObject> {
    self.0.upgrade().map(JsObject)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn objects_compare_by_identity() {
    let a = Value::object();
    let b = Value::object();
    assert!(a.strict_equals(&a.clone()));
    assert!(!a.strict_equals(&b));
    assert!(Value::Number(42.0).strict_equals(&Value::Number(42.0)));
    assert!(!Value::Null.strict_equals(&Value::Undefined));
  }

  #[test]
  fn weak_handle_fails_after_last_strong_owner_drops() {
    let obj = Value::object();
    let weak = obj.as_object().unwrap().downgrade();
    assert!(weak.upgrade().is_some());
    drop(obj);
    assert!(weak.upgrade().is_none());
  }
}

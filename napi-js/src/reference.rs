use crate::error::NapiError;
use crate::error::NapiResult;
use crate::slots::SlotId;
use crate::slots::Slots;
use crate::value::JsObject;
use crate::value::Value;
use crate::value::WeakJsObject;

/// A handle to a reference created by
/// [`Environment::create_reference`](crate::Environment::create_reference).
///
/// Only the component that created the reference may delete it. Once deleted, the id is stale and
/// every operation on it fails.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ReferenceId(SlotId);

impl ReferenceId {
  pub fn slot(self) -> SlotId {
    self.0
  }
}

struct Reference {
  count: u32,
  /// Held only while `count > 0`.
  strong: Option<JsObject>,
  weak: WeakJsObject,
}

#[derive(Default)]
pub(crate) struct ReferenceTable {
  slots: Slots<Reference>,
}

impl ReferenceTable {
  pub fn create(&mut self, value: &Value, initial_count: u32) -> NapiResult<ReferenceId> {
    let obj = value.as_object().ok_or_else(NapiError::invalid_arg)?;
    let reference = Reference {
      count: initial_count,
      strong: (initial_count > 0).then(|| obj.clone()),
      weak: obj.downgrade(),
    };
    Ok(ReferenceId(self.slots.insert(reference)))
  }

  fn get_mut(&mut self, id: ReferenceId) -> NapiResult<&mut Reference> {
    self
      .slots
      .get_mut(id.0)
      .ok_or_else(NapiError::generic_failure)
  }

  /// Increments the strong count. Going from 0 to 1 re-acquires the value, which fails if the
  /// host already reclaimed it.
  pub fn reference_ref(&mut self, id: ReferenceId) -> NapiResult<u32> {
    let reference = self.get_mut(id)?;
    if reference.count == 0 {
      let obj = reference.weak.upgrade().ok_or_else(NapiError::generic_failure)?;
      reference.strong = Some(obj);
    }
    reference.count = reference
      .count
      .checked_add(1)
      .ok_or_else(NapiError::generic_failure)?;
    Ok(reference.count)
  }

  pub fn reference_unref(&mut self, id: ReferenceId) -> NapiResult<u32> {
    let reference = self.get_mut(id)?;
    if reference.count == 0 {
      return Err(NapiError::generic_failure());
    }
    reference.count -= 1;
    if reference.count == 0 {
      reference.strong = None;
    }
    Ok(reference.count)
  }

  pub fn count(&self, id: ReferenceId) -> NapiResult<u32> {
    self
      .slots
      .get(id.0)
      .map(|reference| reference.count)
      .ok_or_else(NapiError::generic_failure)
  }

  pub fn value(&self, id: ReferenceId) -> NapiResult<Value> {
    let reference = self.slots.get(id.0).ok_or_else(NapiError::generic_failure)?;
    reference
      .strong
      .clone()
      .or_else(|| reference.weak.upgrade())
      .map(Value::Object)
      .ok_or_else(NapiError::generic_failure)
  }

  /// Releases the reference record. Valid at any count; a weak-only value is not revived.
  pub fn delete(&mut self, id: ReferenceId) -> NapiResult<()> {
    self
      .slots
      .remove(id.0)
      .map(drop)
      .ok_or_else(NapiError::generic_failure)
  }

  /// Drops every remaining reference, returning how many were left.
  pub fn clear(&mut self) -> usize {
    let leaked = self.slots.len();
    self.slots = Slots::default();
    leaked
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::Status;

  #[test]
  fn strong_reference_keeps_value_alive() -> NapiResult<()> {
    let mut table = ReferenceTable::default();
    let id = table.create(&Value::object(), 1)?;
    assert!(table.value(id)?.as_object().is_some());
    Ok(())
  }

  #[test]
  fn weak_reference_fails_once_value_is_reclaimed() -> NapiResult<()> {
    let mut table = ReferenceTable::default();
    let value = Value::object();
    let id = table.create(&value, 0)?;
    assert!(table.value(id).is_ok());
    drop(value);
    assert_eq!(
      table.value(id).unwrap_err().status(),
      Status::GenericFailure
    );
    assert_eq!(
      table.reference_ref(id).unwrap_err().status(),
      Status::GenericFailure
    );
    Ok(())
  }

  #[test]
  fn unref_releases_the_strong_hold() -> NapiResult<()> {
    let mut table = ReferenceTable::default();
    let id = table.create(&Value::object(), 1)?;
    assert_eq!(table.reference_ref(id)?, 2);
    assert_eq!(table.reference_unref(id)?, 1);
    assert_eq!(table.reference_unref(id)?, 0);
    assert!(table.value(id).is_err());
    assert_eq!(
      table.reference_unref(id).unwrap_err().status(),
      Status::GenericFailure
    );
    Ok(())
  }

  #[test]
  fn primitives_cannot_be_referenced() {
    let mut table = ReferenceTable::default();
    assert_eq!(
      table.create(&Value::Number(1.0), 1).unwrap_err().status(),
      Status::InvalidArg
    );
  }
}

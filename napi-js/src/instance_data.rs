use std::any::Any;

use crate::env::Environment;

/// Finalizer for environment instance data. Receives the data by value and the hint that was
/// supplied alongside it, unmodified.
pub type FinalizeCallback<T> = Box<dyn FnOnce(&mut Environment, T, Option<Box<dyn Any>>)>;

trait Occupant {
  fn data(&self) -> &dyn Any;
  fn data_mut(&mut self) -> &mut dyn Any;
  fn finalize(self: Box<Self>, env: &mut Environment);
}

struct TypedOccupant<T> {
  data: T,
  finalize_cb: Option<FinalizeCallback<T>>,
  finalize_hint: Option<Box<dyn Any>>,
}

impl<T: 'static> Occupant for TypedOccupant<T> {
  fn data(&self) -> &dyn Any {
    &self.data
  }

  fn data_mut(&mut self) -> &mut dyn Any {
    &mut self.data
  }

  fn finalize(self: Box<Self>, env: &mut Environment) {
    let TypedOccupant {
      data,
      finalize_cb,
      finalize_hint,
    } = *self;
    if let Some(finalize_cb) = finalize_cb {
      finalize_cb(env, data, finalize_hint);
    }
  }
}

/// The current occupant of an [`InstanceDataSlot`], taken out for finalization.
pub(crate) struct InstanceData(Box<dyn Occupant>);

impl InstanceData {
  /// Invokes the finalizer, if one was supplied. Consumes the occupancy, so it runs at most once.
  pub fn finalize(self, env: &mut Environment) {
    self.0.finalize(env);
  }
}

/// Single-slot holder for the environment's instance data.
#[derive(Default)]
pub(crate) struct InstanceDataSlot {
  occupant: Option<InstanceData>,
}

impl InstanceDataSlot {
  pub fn install<T: 'static>(
    &mut self,
    data: T,
    finalize_cb: Option<FinalizeCallback<T>>,
    finalize_hint: Option<Box<dyn Any>>,
  ) {
    debug_assert!(self.occupant.is_none(), "previous occupant was not finalized");
    self.occupant = Some(InstanceData(Box::new(TypedOccupant {
      data,
      finalize_cb,
      finalize_hint,
    })));
  }

  pub fn take(&mut self) -> Option<InstanceData> {
    self.occupant.take()
  }

  /// Returns `None` if the slot is empty or holds a different type.
  pub fn get<T: 'static>(&self) -> Option<&T> {
    self.occupant.as_ref()?.0.data().downcast_ref::<T>()
  }

  pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
    self.occupant.as_mut()?.0.data_mut().downcast_mut::<T>()
  }
}

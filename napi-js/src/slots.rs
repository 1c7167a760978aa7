use core::fmt;

/// A stable identifier for an entry in a [`Slots`] table.
///
/// This is a packed `{ index: u32, generation: u32 }`. The generation of a slot is incremented
/// every time its entry is removed, so an id outlives its entry only as a detectably stale handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SlotId(u64);

impl SlotId {
  fn from_parts(index: u32, generation: u32) -> Self {
    Self((index as u64) | ((generation as u64) << 32))
  }

  #[inline]
  pub fn index(self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub fn generation(self) -> u32 {
    (self.0 >> 32) as u32
  }
}

impl fmt::Debug for SlotId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}v{}", self.index(), self.generation())
  }
}

struct Entry<T> {
  generation: u32,
  value: Option<T>,
}

/// Index-addressed storage with generation-checked ids and slot reuse.
pub(crate) struct Slots<T> {
  entries: Vec<Entry<T>>,
  free: Vec<u32>,
  len: usize,
}

impl<T> Default for Slots<T> {
  fn default() -> Self {
    Self {
      entries: Vec::new(),
      free: Vec::new(),
      len: 0,
    }
  }
}

impl<T> Slots<T> {
  pub fn insert(&mut self, value: T) -> SlotId {
    self.len += 1;
    match self.free.pop() {
      Some(index) => {
        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.value.is_none());
        entry.value = Some(value);
        SlotId::from_parts(index, entry.generation)
      }
      None => {
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
          generation: 0,
          value: Some(value),
        });
        SlotId::from_parts(index, 0)
      }
    }
  }

  fn entry(&self, id: SlotId) -> Option<&Entry<T>> {
    self
      .entries
      .get(id.index() as usize)
      .filter(|entry| entry.generation == id.generation())
  }

  pub fn get(&self, id: SlotId) -> Option<&T> {
    self.entry(id).and_then(|entry| entry.value.as_ref())
  }

  pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
    self
      .entries
      .get_mut(id.index() as usize)
      .filter(|entry| entry.generation == id.generation())
      .and_then(|entry| entry.value.as_mut())
  }

  pub fn contains(&self, id: SlotId) -> bool {
    self.get(id).is_some()
  }

  pub fn remove(&mut self, id: SlotId) -> Option<T> {
    let entry = self
      .entries
      .get_mut(id.index() as usize)
      .filter(|entry| entry.generation == id.generation())?;
    let value = entry.value.take()?;
    entry.generation = entry.generation.wrapping_add(1);
    self.free.push(id.index());
    self.len -= 1;
    Some(value)
  }

  pub fn len(&self) -> usize {
    self.len
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn removed_ids_go_stale_when_slot_is_reused() {
    let mut slots = Slots::default();
    let a = slots.insert("a");
    assert_eq!(slots.remove(a), Some("a"));
    assert_eq!(slots.remove(a), None);

    let b = slots.insert("b");
    assert_eq!(b.index(), a.index());
    assert_ne!(b.generation(), a.generation());
    assert_eq!(slots.get(a), None);
    assert_eq!(slots.get(b), Some(&"b"));
    assert_eq!(slots.len(), 1);
  }
}

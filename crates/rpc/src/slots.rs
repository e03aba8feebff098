//! Slot registry resolving completion tags to live objects.

use std::collections::BTreeSet;

use crate::error::RegistryError;
use crate::queue::Tag;

/// Recycling index allocator.
///
/// Hands out `0, 1, 2, ...` until the first index is freed, then always reuses the
/// lowest freed index before growing again. Freeing an index twice is tolerated.
#[derive(Debug, Clone)]
pub struct IndexAllocator {
	free: BTreeSet<u32>,
	limit: u32,
	next_new: u32,
}

impl Default for IndexAllocator {
	fn default() -> Self {
		Self::new(u32::MAX)
	}
}

impl IndexAllocator {
	/// Creates an allocator handing out at most `limit` distinct indices.
	pub fn new(limit: u32) -> Self {
		Self {
			free: BTreeSet::new(),
			limit,
			next_new: 0,
		}
	}

	/// Returns true if `index` was ever handed out.
	pub fn check(&self, index: u32) -> bool {
		index < self.next_new
	}

	/// Indices currently in use.
	pub fn num_live(&self) -> u32 {
		self.next_new - self.num_free()
	}

	/// Indices waiting to be recycled.
	pub fn num_free(&self) -> u32 {
		self.free.len() as u32
	}

	/// Distinct indices handed out so far.
	pub fn num_allocated(&self) -> u32 {
		self.next_new
	}

	/// Returns the lowest recycled index, else the next fresh one, else `None` when full.
	pub fn allocate(&mut self) -> Option<u32> {
		if let Some(index) = self.free.pop_first() {
			return Some(index);
		}
		if self.next_new >= self.limit {
			return None;
		}
		let index = self.next_new;
		self.next_new += 1;
		Some(index)
	}

	/// Returns `index` to the pool. Returns false for unknown or already freed indices.
	pub fn free(&mut self, index: u32) -> bool {
		self.check(index) && self.free.insert(index)
	}

	/// Forgets every allocation.
	pub fn clear(&mut self) {
		self.free.clear();
		self.next_new = 0;
	}
}

#[derive(Debug)]
struct Slot<T> {
	generation: u32,
	value: Option<T>,
}

/// Arena of objects addressed by [`Tag`].
///
/// Removing an object bumps its slot generation, so tags held by the transport after
/// the object is gone simply fail [`SlotRegistry::get_mut`].
#[derive(Debug)]
pub struct SlotRegistry<T> {
	slots: Vec<Slot<T>>,
	indices: IndexAllocator,
}

impl<T> Default for SlotRegistry<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> SlotRegistry<T> {
	/// Creates an unbounded registry.
	pub fn new() -> Self {
		Self::with_limit(u32::MAX)
	}

	/// Creates a registry holding at most `limit` live objects.
	pub fn with_limit(limit: u32) -> Self {
		Self {
			slots: Vec::new(),
			indices: IndexAllocator::new(limit),
		}
	}

	/// Number of live objects.
	pub fn len(&self) -> usize {
		self.indices.num_live() as usize
	}

	/// Returns true when no object is live.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns true when no further object can be inserted.
	pub fn is_full(&self) -> bool {
		self.indices.num_free() == 0 && self.indices.num_allocated() >= self.indices.limit
	}

	/// Stores `value` and returns its tag.
	///
	/// # Errors
	///
	/// Returns [`RegistryError::Full`] when the limit is reached; `value` is dropped.
	pub fn insert(&mut self, value: T) -> Result<Tag, RegistryError> {
		let index = self.indices.allocate().ok_or(RegistryError::Full)?;
		if index as usize == self.slots.len() {
			self.slots.push(Slot { generation: 0, value: None });
		}
		let slot = &mut self.slots[index as usize];
		slot.value = Some(value);
		Ok(Tag::new(index, slot.generation))
	}

	/// Returns true if `tag` names a live object.
	pub fn contains(&self, tag: Tag) -> bool {
		self.slots
			.get(tag.index() as usize)
			.is_some_and(|slot| slot.generation == tag.generation() && slot.value.is_some())
	}

	/// Resolves `tag` to its live object.
	pub fn get_mut(&mut self, tag: Tag) -> Option<&mut T> {
		self.slots
			.get_mut(tag.index() as usize)
			.filter(|slot| slot.generation == tag.generation())
			.and_then(|slot| slot.value.as_mut())
	}

	/// Removes and returns the object named by `tag`.
	pub fn remove(&mut self, tag: Tag) -> Option<T> {
		let slot = self
			.slots
			.get_mut(tag.index() as usize)
			.filter(|slot| slot.generation == tag.generation())?;
		let value = slot.value.take()?;
		slot.generation = slot.generation.wrapping_add(1);
		self.indices.free(tag.index());
		Some(value)
	}

	/// Tags of every live object, lowest index first.
	pub fn tags(&self) -> Vec<Tag> {
		self.slots
			.iter()
			.enumerate()
			.filter(|(_, slot)| slot.value.is_some())
			.map(|(index, slot)| Tag::new(index as u32, slot.generation))
			.collect()
	}

	/// Removes every live object, lowest index first.
	pub fn drain(&mut self) -> Vec<(Tag, T)> {
		let tags = self.tags();
		tags.into_iter()
			.filter_map(|tag| self.remove(tag).map(|value| (tag, value)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn allocator_fills_then_recycles_lowest() {
		let mut alloc = IndexAllocator::new(100);
		for i in 0..100 {
			assert_eq!(alloc.allocate(), Some(i));
		}
		assert_eq!(alloc.allocate(), None);
		assert_eq!(alloc.num_live(), 100);

		assert!(alloc.free(37));
		assert_eq!(alloc.allocate(), Some(37));

		for index in [24, 57, 35, 17, 44, 96] {
			assert!(alloc.free(index));
		}
		assert_eq!(alloc.num_free(), 6);
		assert_eq!(alloc.num_live(), 94);
		assert_eq!(alloc.allocate(), Some(17));
		assert_eq!(alloc.allocate(), Some(24));
		assert_eq!(alloc.num_allocated(), 100);

		alloc.clear();
		assert_eq!(alloc.num_live(), 0);
		assert_eq!(alloc.allocate(), Some(0));
	}

	#[test]
	fn allocator_tolerates_double_free() {
		let mut alloc = IndexAllocator::default();
		let a = alloc.allocate().unwrap();
		let _b = alloc.allocate().unwrap();
		assert!(alloc.free(a));
		assert!(!alloc.free(a));
		assert!(!alloc.free(99));
		assert_eq!(alloc.num_live(), 1);
		assert_eq!(alloc.allocate(), Some(a));
		assert_eq!(alloc.allocate(), Some(2));
	}

	#[test]
	fn stale_tag_fails_liveness_after_reuse() {
		let mut registry = SlotRegistry::new();
		let first = registry.insert("first").unwrap();
		assert_eq!(registry.remove(first), Some("first"));

		let second = registry.insert("second").unwrap();
		assert_eq!(second.index(), first.index());
		assert_ne!(second, first);

		assert!(registry.get_mut(first).is_none());
		assert!(registry.remove(first).is_none());
		assert_eq!(registry.get_mut(second).copied(), Some("second"));
	}

	#[test]
	fn limit_reports_full() {
		let mut registry = SlotRegistry::with_limit(2);
		let a = registry.insert(1).unwrap();
		registry.insert(2).unwrap();
		assert!(registry.is_full());
		assert_eq!(registry.insert(3), Err(RegistryError::Full));

		registry.remove(a);
		assert!(!registry.is_full());
		assert_eq!(registry.insert(4).map(|t| t.index()), Ok(0));
	}

	#[test]
	fn drain_empties_in_index_order() {
		let mut registry = SlotRegistry::new();
		let tags: Vec<_> = ["a", "b", "c"].into_iter().map(|v| registry.insert(v).unwrap()).collect();
		registry.remove(tags[1]);

		let drained: Vec<_> = registry.drain().into_iter().map(|(_, v)| v).collect();
		assert_eq!(drained, vec!["a", "c"]);
		assert!(registry.is_empty());
		assert!(!registry.contains(tags[0]));
	}
}

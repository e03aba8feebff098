//! Shared cell a transport fills before posting the owning tag.

use std::sync::Arc;

use parking_lot::Mutex;

/// Single-value mailbox shared by a call or handler and the transport.
///
/// The transport [`Slot::put`]s the value first and posts the tag second, so the owner
/// finds it filled when the completion is dispatched.
#[derive(Debug)]
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
	/// Creates an empty slot.
	pub fn new() -> Self {
		Self(Arc::new(Mutex::new(None)))
	}

	/// Stores `value`, replacing whatever was there.
	pub fn put(&self, value: T) {
		*self.0.lock() = Some(value);
	}

	/// Takes the value out, leaving the slot empty.
	pub fn take(&self) -> Option<T> {
		self.0.lock().take()
	}

	/// Returns true while a value is stored.
	pub fn is_filled(&self) -> bool {
		self.0.lock().is_some()
	}
}

impl<T> Clone for Slot<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl<T> Default for Slot<T> {
	fn default() -> Self {
		Self::new()
	}
}

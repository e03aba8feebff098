//! Ordered completion queue: the single suspension point of a driver.
//!
//! Transports post `(tag, outcome)` pairs through a [`Completer`]; the owning driver pulls
//! them one at a time with [`CompletionQueue::next`]. Delivery is FIFO across the whole
//! queue, which preserves the completion order of each individual tag. Nothing is promised
//! about the relative order of different tags beyond the order the transport posted them.

use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

/// Integer handle naming one live call or handler slot.
///
/// The generation distinguishes successive occupants of the same slot, so a tag that
/// outlives its object fails the registry liveness check instead of resolving to a
/// recycled neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
	index: u32,
	generation: u32,
}

impl Tag {
	/// Creates a tag from its raw parts.
	#[must_use]
	pub const fn new(index: u32, generation: u32) -> Self {
		Self { index, generation }
	}

	/// Slot index.
	#[must_use]
	pub const fn index(self) -> u32 {
		self.index
	}

	/// Slot generation at the time the tag was issued.
	#[must_use]
	pub const fn generation(self) -> u32 {
		self.generation
	}
}

impl fmt::Display for Tag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}v{}", self.index, self.generation)
	}
}

/// How an asynchronous operation ended.
///
/// Only [`Outcome::Ok`] means the operation completed and its buffers may be trusted.
/// The remaining variants keep the causes of a failed completion apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// The operation completed.
	Ok,
	/// The operation was abandoned after an explicit cancellation.
	Cancelled,
	/// The underlying stream or connection failed.
	Failed,
	/// The driver shut down before the operation could complete.
	Shutdown,
}

impl Outcome {
	/// The boolean success flag of the completion.
	#[must_use]
	pub const fn is_ok(self) -> bool {
		matches!(self, Self::Ok)
	}

	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "ok",
			Self::Cancelled => "cancelled",
			Self::Failed => "failed",
			Self::Shutdown => "shutdown",
		}
	}
}

/// One delivered completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
	/// Tag of the object that issued the operation.
	pub tag: Tag,
	/// How the operation ended.
	pub outcome: Outcome,
}

/// Counters kept by a dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
	/// Objects registered with the driver.
	pub spawned: u64,
	/// Events resolved to a live object.
	pub dispatched: u64,
	/// Objects released by the driver.
	pub destroyed: u64,
	/// Events whose tag failed the liveness check.
	pub stale: u64,
}

/// Producer side of a [`CompletionQueue`], held by transports.
#[derive(Debug, Clone)]
pub struct Completer {
	tx: mpsc::UnboundedSender<Event>,
	shutdown: CancellationToken,
}

impl Completer {
	/// Posts a completion for `tag`.
	///
	/// # Errors
	///
	/// Returns [`QueueError::ShutDown`] once shutdown was requested. The completion is
	/// dropped; the driver settles the owning object during drain instead.
	pub fn complete(&self, tag: Tag, outcome: Outcome) -> Result<(), QueueError> {
		if self.shutdown.is_cancelled() {
			return Err(QueueError::ShutDown);
		}
		self.tx.send(Event { tag, outcome }).map_err(|_| QueueError::ShutDown)
	}

	/// Returns true once the queue refuses completions.
	pub fn is_shutdown(&self) -> bool {
		self.shutdown.is_cancelled()
	}
}

/// Cloneable handle requesting queue shutdown from outside the driver.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
	token: CancellationToken,
}

impl ShutdownHandle {
	/// Requests shutdown. Idempotent.
	pub fn shutdown(&self) {
		self.token.cancel();
	}

	/// Returns true once shutdown was requested.
	pub fn is_shutdown(&self) -> bool {
		self.token.is_cancelled()
	}
}

/// Ordered multiplexer of completions, owned by exactly one driver.
#[derive(Debug)]
pub struct CompletionQueue {
	rx: mpsc::UnboundedReceiver<Event>,
	tx: mpsc::UnboundedSender<Event>,
	shutdown: CancellationToken,
	closed: bool,
	drained: bool,
}

impl Default for CompletionQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl CompletionQueue {
	/// Creates an open, empty queue.
	pub fn new() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			rx,
			tx,
			shutdown: CancellationToken::new(),
			closed: false,
			drained: false,
		}
	}

	/// Returns a producer handle for transports.
	pub fn completer(&self) -> Completer {
		Completer {
			tx: self.tx.clone(),
			shutdown: self.shutdown.clone(),
		}
	}

	/// Returns a handle that can request shutdown from another task.
	pub fn shutdown_handle(&self) -> ShutdownHandle {
		ShutdownHandle {
			token: self.shutdown.clone(),
		}
	}

	/// Waits for the next completion.
	///
	/// Returns `None` once shutdown was requested and every buffered event has been
	/// delivered.
	pub async fn next(&mut self) -> Option<Event> {
		if !self.closed {
			tokio::select! {
				biased;
				event = self.rx.recv() => return event,
				() = self.shutdown.cancelled() => {}
			}
			self.close();
		}
		self.rx.recv().await
	}

	/// Requests shutdown. Idempotent.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Returns true once shutdown was requested.
	pub fn is_shutdown(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Returns true after [`Self::drain`] ran.
	pub fn is_drained(&self) -> bool {
		self.drained
	}

	/// Shuts the queue down and discards whatever is still buffered.
	///
	/// Returns the number of discarded events. After draining, [`Self::next`] only ever
	/// returns `None`.
	pub fn drain(&mut self) -> usize {
		self.shutdown();
		self.close();
		let mut discarded = 0;
		while let Ok(event) = self.rx.try_recv() {
			tracing::trace!(tag = %event.tag, outcome = event.outcome.as_str(), "rpc.queue.discard");
			discarded += 1;
		}
		self.drained = true;
		discarded
	}

	fn close(&mut self) {
		if !self.closed {
			self.rx.close();
			self.closed = true;
			tracing::trace!("rpc.queue.closed");
		}
	}
}

impl Drop for CompletionQueue {
	fn drop(&mut self) {
		if !self.drained {
			let discarded = self.drain();
			tracing::warn!(discarded, "rpc.queue.dropped_undrained");
		}
	}
}

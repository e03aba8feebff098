//! Outbound unit of work.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::queue::{Completer, Outcome, Tag};
use crate::status::RpcStatus;

/// Per-call context: cancellation, peer and metadata, terminal status.
///
/// A context belongs to exactly one call and must not be reused.
#[derive(Debug, Default)]
pub struct CallContext {
	cancel: CancellationToken,
	peer: Option<String>,
	metadata: BTreeMap<String, String>,
	status: RpcStatus,
}

impl CallContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Token the transport watches to abandon the operation.
	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Requests best-effort cancellation.
	pub fn try_cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns true once cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Peer address reported by the transport.
	pub fn peer(&self) -> Option<&str> {
		self.peer.as_deref()
	}

	/// Records the peer address.
	pub fn set_peer(&mut self, peer: impl Into<String>) {
		self.peer = Some(peer.into());
	}

	/// Metadata sent with the request.
	pub fn metadata(&self) -> &BTreeMap<String, String> {
		&self.metadata
	}

	/// Adds one metadata entry.
	pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.metadata.insert(key.into(), value.into());
	}

	/// Terminal status, meaningful once a reply arrived.
	pub fn status(&self) -> &RpcStatus {
		&self.status
	}

	/// Records the terminal status.
	pub fn set_status(&mut self, status: RpcStatus) {
		self.status = status;
	}
}

/// Everything a call needs to issue its request.
#[derive(Debug)]
pub struct CallStart<'a, S> {
	/// Stub opened by the owning client.
	pub stub: &'a S,
	/// Tag to attach to the resulting completion.
	pub tag: Tag,
	/// Producer for the owning client's queue.
	pub completer: &'a Completer,
}

/// One outstanding outbound RPC.
///
/// The owning [`crate::Client`] calls [`Call::start`] exactly once, then
/// [`Call::process_reply`] for every completion carrying the call's tag, and releases the
/// call through [`Call::destroy`] unless [`Call::keep_alive`] asks otherwise.
pub trait Call<S>: Send + 'static {
	/// Issues the request and tags the resulting completion with `cx.tag`.
	fn start(&mut self, cx: CallStart<'_, S>);

	/// Handles one completion.
	///
	/// Anything but [`Outcome::Ok`] means the reply buffers must not be trusted. Logical
	/// success of a valid reply is the response type's business.
	fn process_reply(&mut self, outcome: Outcome);

	/// Returns true to stay registered for further completions.
	fn keep_alive(&self) -> bool {
		false
	}

	/// Releases the call. Pooled implementations override this to recycle storage.
	fn destroy(self: Box<Self>) {
		drop(self);
	}

	/// Per-call context.
	fn context(&self) -> &CallContext;

	/// Best-effort cancellation; a terminal [`Call::process_reply`] still follows.
	fn cancel(&self) {
		self.context().try_cancel();
	}

	/// Terminal status recorded by the call.
	fn status(&self) -> &RpcStatus {
		self.context().status()
	}

	/// Name used in logs.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancellation_is_visible_through_the_token() {
		let mut cx = CallContext::new();
		let token = cx.cancel_token().clone();
		assert!(!token.is_cancelled());

		cx.try_cancel();
		assert!(token.is_cancelled());
		assert!(cx.is_cancelled());

		cx.set_peer("127.0.0.1:50051");
		cx.insert_metadata("session", "7");
		assert_eq!(cx.peer(), Some("127.0.0.1:50051"));
		assert_eq!(cx.metadata().get("session").map(String::as_str), Some("7"));
	}
}

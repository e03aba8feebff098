//! Seams between the engine and a concrete RPC transport.
//!
//! The engine only needs three things from a transport: a way to open a channel stub from
//! a URI, a listener builder that binds addresses and registers a method table, and
//! producers that post completions through a [`Completer`].

use std::net::SocketAddr;

use crate::error::TransportError;
use crate::queue::Completer;

/// Client-side view of a remote service, opened from a URI.
///
/// Opening a stub must not perform I/O; transports connect lazily on the first call.
pub trait Stub: Send + Sync + Sized + 'static {
	/// Opens a channel to `uri`.
	///
	/// # Errors
	///
	/// Returns [`TransportError::InvalidUri`] when `uri` cannot name a peer.
	fn connect(uri: &str) -> Result<Self, TransportError>;
}

/// A running listener accepting inbound requests.
pub trait Listener: Send + Sync + 'static {
	/// Method-table handle handlers use to request the next matching call.
	type Service: Send + Sync + 'static;

	/// Port the listener is bound to.
	fn port(&self) -> u16;

	/// Returns the service handle.
	fn service(&self) -> &Self::Service;

	/// Stops accepting requests and cancels every pending acceptor. Idempotent.
	///
	/// Cancelled acceptors are completed with [`crate::Outcome::Cancelled`] through the
	/// completer the listener was built with.
	fn shutdown(&self);
}

/// Builder binding addresses and registering methods before a listener starts.
pub trait ListenerBuilder: Send + 'static {
	/// Listener produced by [`Self::build_and_start`].
	type Listener: Listener;

	/// Adds an address to bind. Port 0 picks any free port.
	fn add_listening_port(&mut self, addr: SocketAddr);

	/// Adds a method name to the table of served methods.
	fn register_method(&mut self, method: &'static str);

	/// Binds every address and starts accepting.
	///
	/// # Errors
	///
	/// Returns [`TransportError::Bind`] when an address cannot be bound.
	fn build_and_start(self, completer: Completer) -> Result<Self::Listener, TransportError>;
}

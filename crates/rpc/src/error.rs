//! Error types for the engine and the transport seams.

use std::io;
use std::net::SocketAddr;

use crate::queue::Tag;

/// A convenient type alias for `Result` with `E` = [`RpcError`].
pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RpcError {
	/// The transport could not open a channel or listener.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// No free slot was left to register a call or handler.
	#[error(transparent)]
	Registry(#[from] RegistryError),
	/// A caller broke the engine's object-lifetime protocol.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// The completion queue no longer accepts work.
	#[error(transparent)]
	Queue(#[from] QueueError),
}

/// Failures reported by a transport while opening channels or listeners.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
	/// The URI could not be parsed into a host and port.
	#[error("invalid uri: {0}")]
	InvalidUri(String),
	/// The listener could not bind its address.
	#[error("failed to bind {addr}: {source}")]
	Bind {
		/// Address the listener tried to bind.
		addr: SocketAddr,
		/// Underlying socket error.
		#[source]
		source: io::Error,
	},
	/// Input/output errors from the underlying sockets.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// The transport was shut down.
	#[error("transport closed")]
	Closed,
	/// A message could not be encoded or decoded.
	#[error("codec error: {0}")]
	Codec(String),
}

/// Violations of the call/handler lifetime protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
	/// An event referenced a tag whose slot is empty or was recycled.
	#[error("stale or unknown tag {0}")]
	StaleTag(Tag),
	/// A handler was asked to proceed after it reached its terminal state.
	#[error("handler `{handler}` proceeded past its terminal state")]
	Terminal {
		/// Name of the offending handler type.
		handler: &'static str,
	},
}

/// Completion queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
	/// Shutdown was requested; the queue refuses new completions.
	#[error("completion queue is shut down")]
	ShutDown,
}

/// Slot registry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	/// Every slot up to the configured limit is occupied.
	#[error("slot registry is full")]
	Full,
}

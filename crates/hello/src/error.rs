//! Error types for the hello service and its client.

use std::path::PathBuf;

use mondo_rpc::{Outcome, RpcError, RpcStatus, TransportError};

/// A convenient type alias for `Result` with `E` = [`HelloError`].
pub type Result<T, E = HelloError> = std::result::Result<T, E>;

/// Errors surfaced by the hello client, server and configuration.
#[derive(Debug, thiserror::Error)]
pub enum HelloError {
	/// The engine refused to start or accept a call.
	#[error(transparent)]
	Rpc(#[from] RpcError),
	/// A message could not be encoded or decoded.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The server answered with a failed status.
	#[error("server returned {0}")]
	Status(RpcStatus),
	/// The call ended without a reply.
	#[error("call ended without reply: {0:?}")]
	NoReply(Outcome),
	/// The call was released before reporting a result.
	#[error("call dropped before completion")]
	Dropped,
	/// The configuration file could not be read.
	#[error("failed to read config {path}: {source}")]
	ConfigIo {
		/// Path of the configuration file.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: std::io::Error,
	},
	/// The configuration file is not valid TOML for [`crate::HelloConfig`].
	#[error("invalid config: {0}")]
	ConfigParse(#[from] toml::de::Error),
}

//! Messages exchanged by the hello service.

use serde::{Deserialize, Serialize};

/// Method opening a session.
pub const START_SESSION: &str = "StartSession";

/// Method relaying blobs in both directions.
pub const POLL_IN_OUT: &str = "PollInOut";

/// Opaque session identifier handed out by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

/// `StartSession` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
	/// Name of the user opening the session.
	pub user: String,
	/// Shared secret, checked when the server is configured with one.
	pub token: Option<String>,
}

/// Typed chunk of application data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
	/// Application-defined tag of the payload.
	pub kind: String,
	/// Raw payload.
	pub data: Vec<u8>,
}

impl Blob {
	/// Creates a blob.
	pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
		Self {
			kind: kind.into(),
			data: data.into(),
		}
	}

	/// Blob carrying UTF-8 text.
	pub fn text(kind: impl Into<String>, text: &str) -> Self {
		Self::new(kind, text.as_bytes())
	}

	/// The payload as text, if it is valid UTF-8.
	pub fn as_text(&self) -> Option<&str> {
		std::str::from_utf8(&self.data).ok()
	}
}

/// Client-to-server blobs. Also the `StartSession` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
	/// Session the blobs belong to.
	pub session_id: SessionId,
	/// Blobs to publish.
	pub blobs: Vec<Blob>,
}

/// Server-to-client blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
	/// Session the blobs were delivered to.
	pub session_id: SessionId,
	/// Blobs published by other sessions since the last poll.
	pub blobs: Vec<Blob>,
	/// Application-level failure; the RPC itself still succeeded.
	pub error: Option<String>,
}

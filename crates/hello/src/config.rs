//! TOML configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HelloError, Result};

/// Port the server listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 50051;

/// Seconds a session may go without polling before it is ended.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 300;

/// Blobs a session's mailbox holds before the oldest are dropped.
pub const DEFAULT_MAILBOX_LIMIT: usize = 1024;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloConfig {
	/// Server settings.
	pub server: ServerConfig,
	/// Client settings.
	pub client: ClientConfig,
	/// Logging settings.
	pub log: LogConfig,
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	/// Interface to bind; empty means every interface.
	pub host: String,
	/// Port to bind; 0 picks any free port.
	pub port: u16,
	/// Word the server greets new sessions with.
	pub greeting: String,
	/// Number of greeting blobs in a `StartSession` reply.
	pub greetings: u32,
	/// Shared secret clients must present, if any.
	pub token: Option<String>,
	/// Seconds without a `PollInOut` after which a session is ended; 0 keeps sessions forever.
	pub session_idle_secs: u64,
	/// Undelivered blobs kept per session; older ones are dropped first. 0 means unbounded.
	pub mailbox_limit: usize,
}

impl ServerConfig {
	/// Idle time after which a session expires, if sessions expire at all.
	pub fn session_idle(&self) -> Option<Duration> {
		(self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
	}
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: String::new(),
			port: DEFAULT_PORT,
			greeting: "hello".into(),
			greetings: 1,
			token: None,
			session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
			mailbox_limit: DEFAULT_MAILBOX_LIMIT,
		}
	}
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// URI of the server.
	pub uri: String,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			uri: format!("127.0.0.1:{DEFAULT_PORT}"),
		}
	}
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
	/// `EnvFilter` directives; `RUST_LOG` takes precedence.
	pub filter: Option<String>,
}

impl HelloConfig {
	/// Reads and parses a configuration file.
	///
	/// # Errors
	///
	/// Fails when the file cannot be read or is not valid configuration TOML.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|source| HelloError::ConfigIo {
			path: path.to_owned(),
			source,
		})?;
		Self::from_toml(&text)
	}

	/// Parses configuration TOML. Missing keys take their defaults.
	///
	/// # Errors
	///
	/// Fails on malformed TOML or mistyped values.
	pub fn from_toml(text: &str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}
}

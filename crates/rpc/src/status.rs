//! Terminal RPC status carried by calls and responses.

use std::fmt;

/// Status codes shared by both ends of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
	/// Not an error.
	#[default]
	Ok,
	/// The operation was cancelled, typically by the caller.
	Cancelled,
	/// Unknown error.
	Unknown,
	/// The client specified an invalid argument.
	InvalidArgument,
	/// The deadline expired before the operation could complete.
	DeadlineExceeded,
	/// Some requested entity was not found.
	NotFound,
	/// The entity a client attempted to create already exists.
	AlreadyExists,
	/// The caller lacks permission for the operation.
	PermissionDenied,
	/// Some resource has been exhausted.
	ResourceExhausted,
	/// The system is not in a state required for the operation.
	FailedPrecondition,
	/// The operation was aborted.
	Aborted,
	/// The operation was attempted past the valid range.
	OutOfRange,
	/// The operation is not implemented by the peer.
	Unimplemented,
	/// Internal error.
	Internal,
	/// The service is currently unavailable.
	Unavailable,
	/// Unrecoverable data loss or corruption.
	DataLoss,
	/// The request lacks valid authentication credentials.
	Unauthenticated,
}

impl StatusCode {
	/// Numeric code used on the wire.
	pub const fn as_u32(self) -> u32 {
		match self {
			Self::Ok => 0,
			Self::Cancelled => 1,
			Self::Unknown => 2,
			Self::InvalidArgument => 3,
			Self::DeadlineExceeded => 4,
			Self::NotFound => 5,
			Self::AlreadyExists => 6,
			Self::PermissionDenied => 7,
			Self::ResourceExhausted => 8,
			Self::FailedPrecondition => 9,
			Self::Aborted => 10,
			Self::OutOfRange => 11,
			Self::Unimplemented => 12,
			Self::Internal => 13,
			Self::Unavailable => 14,
			Self::DataLoss => 15,
			Self::Unauthenticated => 16,
		}
	}

	/// Decodes a numeric code; unknown values map to [`StatusCode::Unknown`].
	pub const fn from_u32(code: u32) -> Self {
		match code {
			0 => Self::Ok,
			1 => Self::Cancelled,
			3 => Self::InvalidArgument,
			4 => Self::DeadlineExceeded,
			5 => Self::NotFound,
			6 => Self::AlreadyExists,
			7 => Self::PermissionDenied,
			8 => Self::ResourceExhausted,
			9 => Self::FailedPrecondition,
			10 => Self::Aborted,
			11 => Self::OutOfRange,
			12 => Self::Unimplemented,
			13 => Self::Internal,
			14 => Self::Unavailable,
			15 => Self::DataLoss,
			16 => Self::Unauthenticated,
			_ => Self::Unknown,
		}
	}

	const fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "ok",
			Self::Cancelled => "cancelled",
			Self::Unknown => "unknown",
			Self::InvalidArgument => "invalid_argument",
			Self::DeadlineExceeded => "deadline_exceeded",
			Self::NotFound => "not_found",
			Self::AlreadyExists => "already_exists",
			Self::PermissionDenied => "permission_denied",
			Self::ResourceExhausted => "resource_exhausted",
			Self::FailedPrecondition => "failed_precondition",
			Self::Aborted => "aborted",
			Self::OutOfRange => "out_of_range",
			Self::Unimplemented => "unimplemented",
			Self::Internal => "internal",
			Self::Unavailable => "unavailable",
			Self::DataLoss => "data_loss",
			Self::Unauthenticated => "unauthenticated",
		}
	}
}

impl fmt::Display for StatusCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Code plus human-readable message describing how a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcStatus {
	code: StatusCode,
	message: String,
}

impl RpcStatus {
	/// Creates a status with the given code and message.
	pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	/// The successful status.
	#[must_use]
	pub fn ok() -> Self {
		Self::default()
	}

	/// Shorthand for [`StatusCode::Cancelled`].
	pub fn cancelled(message: impl Into<String>) -> Self {
		Self::new(StatusCode::Cancelled, message)
	}

	/// Shorthand for [`StatusCode::Internal`].
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(StatusCode::Internal, message)
	}

	/// Shorthand for [`StatusCode::Unavailable`].
	pub fn unavailable(message: impl Into<String>) -> Self {
		Self::new(StatusCode::Unavailable, message)
	}

	/// Shorthand for [`StatusCode::Unimplemented`].
	pub fn unimplemented(message: impl Into<String>) -> Self {
		Self::new(StatusCode::Unimplemented, message)
	}

	/// Shorthand for [`StatusCode::InvalidArgument`].
	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(StatusCode::InvalidArgument, message)
	}

	/// Returns the status code.
	pub const fn code(&self) -> StatusCode {
		self.code
	}

	/// Returns the status message.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Returns true for [`StatusCode::Ok`].
	pub fn is_ok(&self) -> bool {
		self.code == StatusCode::Ok
	}
}

impl fmt::Display for RpcStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.message.is_empty() {
			write!(f, "{}", self.code)
		} else {
			write!(f, "{}: {}", self.code, self.message)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_codes_survive_decoding() {
		for code in [StatusCode::Ok, StatusCode::Cancelled, StatusCode::Unimplemented, StatusCode::Unauthenticated] {
			assert_eq!(StatusCode::from_u32(code.as_u32()), code);
		}
		assert_eq!(StatusCode::from_u32(999), StatusCode::Unknown);
	}

	#[test]
	fn display_includes_message_when_present() {
		assert_eq!(RpcStatus::ok().to_string(), "ok");
		assert_eq!(RpcStatus::unavailable("no route").to_string(), "unavailable: no route");
	}
}

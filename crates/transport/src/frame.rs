//! Wire frames: a little-endian `u32` length followed by a postcard body.

use mondo_rpc::{RpcStatus, StatusCode, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Identifier pairing a response with its request on one connection.
pub type RequestId = u64;

/// One message on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
	/// Client to server: invoke `method` with an encoded request.
	Request {
		/// Connection-unique request id.
		id: RequestId,
		/// Method name from the service's method table.
		method: String,
		/// Encoded request message.
		payload: Vec<u8>,
	},
	/// Server to client: terminal status and encoded response.
	Response {
		/// Id of the answered request.
		id: RequestId,
		/// Wire value of the [`StatusCode`].
		code: u32,
		/// Status message.
		message: String,
		/// Encoded response message; empty unless the status is ok.
		payload: Vec<u8>,
	},
	/// Client to server: the caller gave up on `id`.
	Cancel {
		/// Id of the abandoned request.
		id: RequestId,
	},
}

impl Frame {
	/// Builds a response frame from a status and payload.
	pub fn response(id: RequestId, status: &RpcStatus, payload: Vec<u8>) -> Self {
		Self::Response {
			id,
			code: status.code().as_u32(),
			message: status.message().to_owned(),
			payload,
		}
	}
}

/// Splits a response frame's status fields back into an [`RpcStatus`].
pub fn status_of(code: u32, message: String) -> RpcStatus {
	RpcStatus::new(StatusCode::from_u32(code), message)
}

/// Encodes a message body.
///
/// # Errors
///
/// Returns [`TransportError::Codec`] when serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
	postcard::to_allocvec(value).map_err(|e| TransportError::Codec(e.to_string()))
}

/// Decodes a message body.
///
/// # Errors
///
/// Returns [`TransportError::Codec`] when the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
	postcard::from_bytes(bytes).map_err(|e| TransportError::Codec(e.to_string()))
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Fails on I/O errors, encoding errors, or a body larger than [`MAX_FRAME_LEN`].
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), TransportError> {
	let buf = encode(frame)?;
	let len = checked_len(buf.len())?;
	writer.write_u32_le(len).await?;
	writer.write_all(&buf).await?;
	writer.flush().await?;
	Ok(())
}

/// Reads one frame. Returns `None` on a clean end of stream between frames.
///
/// # Errors
///
/// Fails on I/O errors, truncated frames, oversized frames or undecodable bodies.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, TransportError> {
	let mut header = [0u8; 4];
	let mut filled = 0;
	while filled < header.len() {
		match reader.read(&mut header[filled..]).await? {
			0 if filled == 0 => return Ok(None),
			0 => return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stream ended inside a frame header").into()),
			n => filled += n,
		}
	}
	let len = u32::from_le_bytes(header) as usize;
	if len > MAX_FRAME_LEN {
		return Err(TransportError::Codec(format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}")));
	}
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	decode(&buf).map(Some)
}

fn checked_len(len: usize) -> Result<u32, TransportError> {
	if len > MAX_FRAME_LEN {
		return Err(TransportError::Codec(format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}")));
	}
	u32::try_from(len).map_err(|e| TransportError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tokio::io::duplex;

	use super::*;

	#[tokio::test]
	async fn frames_survive_a_stream() {
		let (mut a, mut b) = duplex(1024);
		let frames = [
			Frame::Request {
				id: 1,
				method: "StartSession".into(),
				payload: vec![1, 2, 3],
			},
			Frame::Cancel { id: 1 },
			Frame::response(1, &RpcStatus::unimplemented("nope"), Vec::new()),
		];
		for frame in &frames {
			write_frame(&mut a, frame).await.unwrap();
		}
		drop(a);

		for frame in &frames {
			assert_eq!(read_frame(&mut b).await.unwrap().as_ref(), Some(frame));
		}
		assert_eq!(read_frame(&mut b).await.unwrap(), None);
	}

	#[tokio::test]
	async fn oversized_length_is_rejected_before_allocating() {
		let (mut a, mut b) = duplex(64);
		a.write_u32_le(u32::MAX).await.unwrap();
		assert!(matches!(read_frame(&mut b).await, Err(TransportError::Codec(_))));
	}

	#[tokio::test]
	async fn truncated_body_is_an_error() {
		let (mut a, mut b) = duplex(64);
		a.write_u32_le(10).await.unwrap();
		a.write_all(&[0, 1]).await.unwrap();
		drop(a);
		assert!(matches!(read_frame(&mut b).await, Err(TransportError::Io(_))));
	}

	#[tokio::test]
	async fn torn_header_is_an_error_not_a_clean_end() {
		let (mut a, mut b) = duplex(64);
		a.write_all(&[7, 0]).await.unwrap();
		drop(a);
		assert!(matches!(read_frame(&mut b).await, Err(TransportError::Io(_))));
	}

	#[tokio::test]
	async fn header_split_across_writes_still_decodes() {
		let frame = Frame::Cancel { id: 9 };
		let body = encode(&frame).unwrap();
		let header = (body.len() as u32).to_le_bytes();
		let (mut a, mut b) = duplex(64);

		let reader = tokio::spawn(async move { read_frame(&mut b).await });
		a.write_all(&header[..1]).await.unwrap();
		a.flush().await.unwrap();
		tokio::task::yield_now().await;
		a.write_all(&header[1..]).await.unwrap();
		a.write_all(&body).await.unwrap();

		assert_eq!(reader.await.unwrap().unwrap(), Some(frame));
	}
}

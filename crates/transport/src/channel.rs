//! Client channel: one lazily connected, multiplexed connection per URI.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mondo_rpc::{CallContext, Completer, Outcome, RpcStatus, Stub, Tag, TransportError};
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{Outbound, OutboundTx, post, write_loop};
use crate::frame::{Frame, RequestId, read_frame, status_of};
use crate::net;
use crate::slot::Slot;

/// What a unary exchange produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryReply {
	/// Address of the server that answered.
	pub peer: SocketAddr,
	/// Encoded response, or the status the server failed the call with.
	pub result: Result<Vec<u8>, RpcStatus>,
}

/// Slot a [`Channel`] fills before posting a unary call's tag.
pub type ReplySlot = Slot<UnaryReply>;

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<(u32, String, Vec<u8>)>>>>;

/// Lazily connected client channel.
///
/// Constructing a channel only validates the URI. The TCP connection is opened by the first
/// call, shared by every concurrent call, and reopened by the next call after it fails.
#[derive(Debug, Clone)]
pub struct Channel {
	inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
	uri: String,
	target: String,
	next_id: AtomicU64,
	/// Connection in use; read without waiting so cancellation always reaches it.
	live: Mutex<Option<Arc<Connection>>>,
	/// Held while a new connection is being opened.
	connecting: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct Connection {
	peer: SocketAddr,
	tx: OutboundTx,
	pending: Pending,
	closed: CancellationToken,
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.closed.cancel();
	}
}

impl Channel {
	/// Creates a channel to `uri` without performing any I/O.
	///
	/// # Errors
	///
	/// Returns [`TransportError::InvalidUri`] when `uri` has no usable host and port.
	pub fn new(uri: &str) -> Result<Self, TransportError> {
		let target = net::target_from_uri(uri)?;
		Ok(Self {
			inner: Arc::new(Inner {
				uri: uri.to_owned(),
				target,
				next_id: AtomicU64::new(1),
				live: Mutex::new(None),
				connecting: tokio::sync::Mutex::new(()),
			}),
		})
	}

	/// The URI the channel was created with.
	pub fn uri(&self) -> &str {
		&self.inner.uri
	}

	/// The `host:port` the channel connects to.
	pub fn target(&self) -> &str {
		&self.inner.target
	}

	/// Returns true while a connection is open.
	pub fn is_connected(&self) -> bool {
		self.open_connection().is_some()
	}

	fn open_connection(&self) -> Option<Arc<Connection>> {
		self.inner.live.lock().as_ref().filter(|conn| !conn.closed.is_cancelled()).cloned()
	}

	/// Starts one unary exchange on its own task.
	///
	/// When the exchange ends, `reply` is filled (on a received response) and `tag` is posted:
	/// [`Outcome::Ok`] when a response arrived, whatever its status; [`Outcome::Cancelled`]
	/// when `cx` was cancelled first, in which case the server is told to abandon the request;
	/// [`Outcome::Failed`] when connecting, writing or reading failed.
	pub fn start_unary(
		&self,
		method: &'static str,
		payload: Vec<u8>,
		cx: &CallContext,
		reply: ReplySlot,
		tag: Tag,
		completer: &Completer,
	) {
		let channel = self.clone();
		let cancel = cx.cancel_token().clone();
		let completer = completer.clone();
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		trace!(uri = %self.inner.uri, method, id, tag = %tag, "transport.channel.start_unary");

		tokio::spawn(async move {
			let outcome = tokio::select! {
				biased;
				() = cancel.cancelled() => {
					channel.abandon(id);
					Outcome::Cancelled
				}
				result = channel.exchange(id, method, payload) => match result {
					Ok(unary) => {
						reply.put(unary);
						Outcome::Ok
					}
					Err(e) => {
						warn!(uri = %channel.inner.uri, method, error = %e, "transport.channel.exchange_failed");
						Outcome::Failed
					}
				},
			};
			post(&completer, tag, outcome);
		});
	}

	async fn exchange(&self, id: RequestId, method: &str, payload: Vec<u8>) -> Result<UnaryReply, TransportError> {
		let conn = self.connection().await?;
		let (tx, rx) = oneshot::channel();
		conn.pending.lock().insert(id, tx);
		let frame = Frame::Request {
			id,
			method: method.to_owned(),
			payload,
		};
		if conn.tx.send(Outbound::plain(frame)).is_err() {
			conn.pending.lock().remove(&id);
			return Err(TransportError::Closed);
		}
		let response = tokio::select! {
			biased;
			response = rx => response.map_err(|_| TransportError::Closed),
			() = conn.closed.cancelled() => {
				conn.pending.lock().remove(&id);
				Err(TransportError::Closed)
			}
		};
		let (code, message, payload) = response?;
		let status = status_of(code, message);
		Ok(UnaryReply {
			peer: conn.peer,
			result: if status.is_ok() { Ok(payload) } else { Err(status) },
		})
	}

	/// Tells the server to drop `id`. A request still waiting for its connection was never sent.
	fn abandon(&self, id: RequestId) {
		let Some(conn) = self.inner.live.lock().clone() else {
			return;
		};
		if conn.pending.lock().remove(&id).is_some() {
			let _ = conn.tx.send(Outbound::plain(Frame::Cancel { id }));
			debug!(uri = %self.inner.uri, id, "transport.channel.cancel_sent");
		}
	}

	async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
		if let Some(conn) = self.open_connection() {
			return Ok(conn);
		}
		let _connecting = self.inner.connecting.lock().await;
		if let Some(conn) = self.open_connection() {
			return Ok(conn);
		}

		let addr = net::resolve(&self.inner.uri).await?;
		let stream = TcpStream::connect(addr).await?;
		stream.set_nodelay(true)?;
		let peer = stream.peer_addr()?;
		let (reader, writer) = stream.into_split();
		let (tx, rx) = mpsc::unbounded_channel();
		let pending = Pending::default();
		let closed = CancellationToken::new();

		tokio::spawn(write_loop(writer, rx, closed.clone()));
		tokio::spawn(read_loop(BufReader::new(reader), Arc::clone(&pending), closed.clone()));
		info!(uri = %self.inner.uri, peer = %peer, "transport.channel.connected");

		let conn = Arc::new(Connection {
			peer,
			tx,
			pending,
			closed,
		});
		*self.inner.live.lock() = Some(Arc::clone(&conn));
		Ok(conn)
	}
}

impl Stub for Channel {
	fn connect(uri: &str) -> Result<Self, TransportError> {
		Self::new(uri)
	}
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, pending: Pending, closed: CancellationToken) {
	loop {
		let frame = tokio::select! {
			biased;
			() = closed.cancelled() => break,
			frame = read_frame(&mut reader) => frame,
		};
		match frame {
			Ok(Some(Frame::Response {
				id,
				code,
				message,
				payload,
			})) => match pending.lock().remove(&id) {
				Some(waiter) => {
					let _ = waiter.send((code, message, payload));
				}
				None => trace!(id, "transport.channel.late_response"),
			},
			Ok(Some(other)) => warn!(frame = ?other, "transport.channel.unexpected_frame"),
			Ok(None) => {
				debug!("transport.channel.eof");
				break;
			}
			Err(e) => {
				warn!(error = %e, "transport.channel.read_failed");
				break;
			}
		}
	}
	closed.cancel();
	pending.lock().clear();
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use mondo_rpc::CompletionQueue;
	use pretty_assertions::assert_eq;

	use super::*;

	const WAIT: Duration = Duration::from_secs(5);

	#[tokio::test]
	async fn cancel_reaches_the_server_while_another_call_is_connecting() {
		let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = server.local_addr().unwrap().port();
		let channel = Channel::new(&format!("ipv4:127.0.0.1:{port}")).unwrap();
		let mut queue = CompletionQueue::new();
		let cx = CallContext::new();
		let tag = Tag::new(3, 1);

		channel.start_unary("Slow", b"x".to_vec(), &cx, ReplySlot::default(), tag, &queue.completer());
		let (stream, _) = tokio::time::timeout(WAIT, server.accept()).await.unwrap().unwrap();
		let mut reader = BufReader::new(stream);
		let id = match tokio::time::timeout(WAIT, read_frame(&mut reader)).await.unwrap().unwrap() {
			Some(Frame::Request { id, method, .. }) => {
				assert_eq!(method, "Slow");
				id
			}
			other => panic!("expected a request, got {other:?}"),
		};
		assert!(channel.is_connected());

		let _connecting = channel.inner.connecting.lock().await;
		cx.try_cancel();
		let frame = tokio::time::timeout(WAIT, read_frame(&mut reader)).await.unwrap().unwrap();
		assert_eq!(frame, Some(Frame::Cancel { id }));

		let event = tokio::time::timeout(WAIT, queue.next()).await.unwrap().unwrap();
		assert_eq!(event.tag, tag);
		assert_eq!(event.outcome, Outcome::Cancelled);
		queue.shutdown();
		queue.drain();
	}
}

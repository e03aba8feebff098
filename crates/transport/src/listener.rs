//! TCP listener: accepts connections, matches requests to standing acceptors.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use mondo_rpc::{Completer, Listener, ListenerBuilder, Outcome, RpcStatus, Tag, TransportError};
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::connection::{Outbound, OutboundTx, post, write_loop};
use crate::frame::{Frame, RequestId, read_frame};
use crate::slot::Slot;

/// One inbound request handed to a handler.
#[derive(Debug)]
pub struct IncomingRequest {
	/// Method the client invoked.
	pub method: String,
	/// Encoded request message.
	pub payload: Vec<u8>,
	/// Address of the calling client.
	pub peer: SocketAddr,
	/// Fires when the client abandons the request.
	pub cancelled: CancellationToken,
	/// Sends the response back on the request's connection.
	pub responder: Responder,
}

/// Slot the listener fills before posting an acceptor's tag.
pub type IncomingSlot = Slot<IncomingRequest>;

/// Write side of one inbound request.
#[derive(Debug)]
pub struct Responder {
	id: RequestId,
	tx: OutboundTx,
	cancels: CancelMap,
}

impl Responder {
	/// Queues the response and posts `tag` once it was written.
	///
	/// The completion is [`Outcome::Ok`] when the frame was flushed and [`Outcome::Failed`]
	/// when the connection is gone. The payload is dropped unless `status` is ok.
	pub fn finish(self, payload: Vec<u8>, status: &RpcStatus, tag: Tag, completer: &Completer) {
		self.cancels.lock().remove(&self.id);
		let payload = if status.is_ok() { payload } else { Vec::new() };
		let outbound = Outbound {
			frame: Frame::response(self.id, status, payload),
			notify: Some((tag, completer.clone())),
		};
		if let Err(mpsc::error::SendError(outbound)) = self.tx.send(outbound) {
			debug!(id = self.id, tag = %tag, "transport.listener.respond_disconnected");
			if let Some((tag, completer)) = outbound.notify {
				post(&completer, tag, Outcome::Failed);
			}
		}
	}

	/// Answers without a completion. Used for requests no handler will see.
	fn reject(self, status: &RpcStatus) {
		self.cancels.lock().remove(&self.id);
		let _ = self.tx.send(Outbound::plain(Frame::response(self.id, status, Vec::new())));
	}
}

type CancelMap = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

struct Acceptor {
	tag: Tag,
	slot: IncomingSlot,
}

#[derive(Default)]
struct ServiceState {
	acceptors: HashMap<&'static str, VecDeque<Acceptor>>,
	backlog: HashMap<&'static str, VecDeque<IncomingRequest>>,
	closed: bool,
}

/// Method table handlers register acceptors with.
#[derive(Clone)]
pub struct AsyncService {
	inner: Arc<ServiceInner>,
}

struct ServiceInner {
	methods: BTreeSet<&'static str>,
	completer: Completer,
	state: Mutex<ServiceState>,
}

impl std::fmt::Debug for AsyncService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("AsyncService")
			.field("methods", &self.inner.methods)
			.field("acceptors", &state.acceptors.values().map(VecDeque::len).sum::<usize>())
			.field("backlog", &state.backlog.values().map(VecDeque::len).sum::<usize>())
			.field("closed", &state.closed)
			.finish()
	}
}

impl AsyncService {
	fn new(methods: BTreeSet<&'static str>, completer: Completer) -> Self {
		Self {
			inner: Arc::new(ServiceInner {
				methods,
				completer,
				state: Mutex::new(ServiceState::default()),
			}),
		}
	}

	/// Registers an acceptor for the next `method` request.
	///
	/// When a request arrives, it is stored in `slot` and `tag` is posted with
	/// [`Outcome::Ok`]. A request already waiting in the backlog is handed over at once.
	/// After shutdown, or for a method outside the table, `tag` is posted with
	/// [`Outcome::Cancelled`].
	pub fn request(&self, method: &'static str, tag: Tag, slot: IncomingSlot) {
		let mut state = self.inner.state.lock();
		if state.closed || !self.inner.methods.contains(method) {
			drop(state);
			post(&self.inner.completer, tag, Outcome::Cancelled);
			return;
		}
		if let Some(request) = state.backlog.get_mut(method).and_then(VecDeque::pop_front) {
			drop(state);
			trace!(method, tag = %tag, "transport.listener.backlog_match");
			slot.put(request);
			post(&self.inner.completer, tag, Outcome::Ok);
			return;
		}
		state.acceptors.entry(method).or_default().push_back(Acceptor { tag, slot });
	}

	/// Method names this service answers.
	pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.inner.methods.iter().copied()
	}

	/// Number of standing acceptors for `method`.
	pub fn pending_acceptors(&self, method: &str) -> usize {
		self.inner.state.lock().acceptors.get(method).map_or(0, VecDeque::len)
	}

	/// Number of requests for `method` waiting for an acceptor.
	pub fn backlog(&self, method: &str) -> usize {
		self.inner.state.lock().backlog.get(method).map_or(0, VecDeque::len)
	}

	fn deliver(&self, request: IncomingRequest) {
		let Some(method) = self.inner.methods.get(request.method.as_str()).copied() else {
			debug!(method = %request.method, "transport.listener.unimplemented");
			let status = RpcStatus::unimplemented(format!("unknown method `{}`", request.method));
			request.responder.reject(&status);
			return;
		};

		let mut state = self.inner.state.lock();
		if state.closed {
			drop(state);
			request.responder.reject(&RpcStatus::unavailable("server shutting down"));
			return;
		}
		match state.acceptors.get_mut(method).and_then(VecDeque::pop_front) {
			Some(Acceptor { tag, slot }) => {
				drop(state);
				trace!(method, tag = %tag, "transport.listener.matched");
				slot.put(request);
				post(&self.inner.completer, tag, Outcome::Ok);
			}
			None => {
				trace!(method, "transport.listener.backlogged");
				state.backlog.entry(method).or_default().push_back(request);
			}
		}
	}

	/// Refuses further acceptors, cancels every standing one and rejects the backlog.
	fn close(&self) {
		let (acceptors, backlog) = {
			let mut state = self.inner.state.lock();
			state.closed = true;
			(std::mem::take(&mut state.acceptors), std::mem::take(&mut state.backlog))
		};
		let mut cancelled = 0usize;
		for acceptor in acceptors.into_values().flatten() {
			post(&self.inner.completer, acceptor.tag, Outcome::Cancelled);
			cancelled += 1;
		}
		for request in backlog.into_values().flatten() {
			request.responder.reject(&RpcStatus::unavailable("server shutting down"));
		}
		debug!(cancelled, "transport.listener.acceptors_cancelled");
	}
}

/// Builds a [`TcpListener`].
#[derive(Debug, Default)]
pub struct TcpListenerBuilder {
	addrs: Vec<SocketAddr>,
	methods: BTreeSet<&'static str>,
}

impl TcpListenerBuilder {
	/// Creates an empty builder.
	pub fn new() -> Self {
		Self::default()
	}
}

impl ListenerBuilder for TcpListenerBuilder {
	type Listener = TcpListener;

	fn add_listening_port(&mut self, addr: SocketAddr) {
		self.addrs.push(addr);
	}

	fn register_method(&mut self, method: &'static str) {
		self.methods.insert(method);
	}

	/// Binds every address and spawns the accept loops. Must run inside a tokio runtime.
	fn build_and_start(self, completer: Completer) -> Result<TcpListener, TransportError> {
		if self.addrs.is_empty() {
			return Err(TransportError::InvalidUri("no listening address".into()));
		}

		let mut bound = Vec::with_capacity(self.addrs.len());
		for addr in &self.addrs {
			let bind = |addr: SocketAddr| -> std::io::Result<tokio::net::TcpListener> {
				let std_listener = std::net::TcpListener::bind(addr)?;
				std_listener.set_nonblocking(true)?;
				tokio::net::TcpListener::from_std(std_listener)
			};
			let listener = bind(*addr).map_err(|source| TransportError::Bind { addr: *addr, source })?;
			bound.push(listener);
		}
		let port = bound[0].local_addr()?.port();

		let service = AsyncService::new(self.methods, completer);
		let shutdown = CancellationToken::new();
		let tracker = TaskTracker::new();
		for listener in bound {
			let local = listener.local_addr()?;
			info!(addr = %local, "transport.listener.bound");
			tracker.spawn(accept_loop(listener, service.clone(), shutdown.clone(), tracker.clone()));
		}

		Ok(TcpListener {
			port,
			service,
			shutdown,
			tracker,
		})
	}
}

/// Running TCP listener.
#[derive(Debug)]
pub struct TcpListener {
	port: u16,
	service: AsyncService,
	shutdown: CancellationToken,
	tracker: TaskTracker,
}

impl TcpListener {
	/// Resolves once shutdown was requested and every connection task has exited.
	pub async fn wait(&self) {
		self.shutdown.cancelled().await;
		self.tracker.wait().await;
	}
}

impl Listener for TcpListener {
	type Service = AsyncService;

	fn port(&self) -> u16 {
		self.port
	}

	fn service(&self) -> &AsyncService {
		&self.service
	}

	fn shutdown(&self) {
		if self.shutdown.is_cancelled() {
			return;
		}
		info!(port = self.port, "transport.listener.shutdown");
		self.service.close();
		self.shutdown.cancel();
		self.tracker.close();
	}
}

impl Drop for TcpListener {
	fn drop(&mut self) {
		self.shutdown();
	}
}

async fn accept_loop(
	listener: tokio::net::TcpListener,
	service: AsyncService,
	shutdown: CancellationToken,
	tracker: TaskTracker,
) {
	loop {
		tokio::select! {
			() = shutdown.cancelled() => break,
			accepted = listener.accept() => match accepted {
				Ok((stream, peer)) => {
					tracker.spawn(serve_connection(stream, peer, service.clone(), shutdown.clone()));
				}
				Err(e) => warn!(error = %e, "transport.listener.accept_failed"),
			},
		}
	}
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, service: AsyncService, shutdown: CancellationToken) {
	debug!(peer = %peer, "transport.listener.connection_opened");
	if let Err(e) = stream.set_nodelay(true) {
		trace!(peer = %peer, error = %e, "transport.listener.nodelay_failed");
	}
	let (reader, writer) = stream.into_split();
	let mut reader = BufReader::new(reader);
	let (tx, rx) = mpsc::unbounded_channel();
	let closed = shutdown.child_token();
	let writer_task = tokio::spawn(write_loop(writer, rx, closed.clone()));
	let cancels = CancelMap::default();

	loop {
		let frame = tokio::select! {
			biased;
			() = closed.cancelled() => break,
			frame = read_frame(&mut reader) => frame,
		};
		match frame {
			Ok(Some(Frame::Request { id, method, payload })) => {
				let cancelled = CancellationToken::new();
				cancels.lock().insert(id, cancelled.clone());
				service.deliver(IncomingRequest {
					method,
					payload,
					peer,
					cancelled,
					responder: Responder {
						id,
						tx: tx.clone(),
						cancels: Arc::clone(&cancels),
					},
				});
			}
			Ok(Some(Frame::Cancel { id })) => {
				if let Some(token) = cancels.lock().remove(&id) {
					debug!(peer = %peer, id, "transport.listener.request_cancelled");
					token.cancel();
				}
			}
			Ok(Some(other)) => warn!(peer = %peer, frame = ?other, "transport.listener.unexpected_frame"),
			Ok(None) => break,
			Err(e) => {
				warn!(peer = %peer, error = %e, "transport.listener.read_failed");
				break;
			}
		}
	}

	for (_, token) in cancels.lock().drain() {
		token.cancel();
	}
	drop(tx);
	if let Err(e) = writer_task.await {
		trace!(peer = %peer, error = %e, "transport.listener.writer_join_failed");
	}
	debug!(peer = %peer, "transport.listener.connection_closed");
}

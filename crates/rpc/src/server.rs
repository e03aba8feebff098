//! Inbound driver: one listener, one queue, a standing acceptor per request type.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RpcError, TransportError};
use crate::handler::{Handler, HandlerCell, HandlerContext, Step};
use crate::queue::{Completer, CompletionQueue, DispatchStats, Event, Outcome, ShutdownHandle};
use crate::slots::SlotRegistry;
use crate::transport::{Listener, ListenerBuilder};

/// Service handle type handed to the handlers of a [`ServiceDefinition`].
pub type ServiceOf<D> = <ListenerOf<D> as Listener>::Service;

type ListenerOf<D> = <<D as ServiceDefinition>::Builder as ListenerBuilder>::Listener;

/// Application side of a server: its method table and its initial handlers.
pub trait ServiceDefinition: Send + 'static {
	/// Listener builder of the transport serving this definition.
	type Builder: ListenerBuilder;

	/// Returns a fresh builder.
	fn builder(&self) -> Self::Builder;

	/// Attaches the method table to the builder.
	fn register_service(&self, builder: &mut Self::Builder);

	/// Constructs exactly one initial handler per supported request type.
	fn spawn_handlers(&self, spawner: &mut Spawner<ServiceOf<Self>>);
}

/// Collects the initial handlers of a [`ServiceDefinition`].
pub struct Spawner<Svc: 'static> {
	handlers: Vec<Box<dyn Handler<Svc>>>,
}

impl<Svc: 'static> Spawner<Svc> {
	fn new() -> Self {
		Self { handlers: Vec::new() }
	}

	/// Adds one initial handler.
	pub fn spawn(&mut self, handler: impl Handler<Svc>) {
		self.handlers.push(Box::new(handler));
	}
}

/// Asynchronous server owning a listener and a completion queue.
pub struct Server<D: ServiceDefinition> {
	definition: D,
	listener: Arc<ListenerOf<D>>,
	queue: CompletionQueue,
	completer: Completer,
	handlers: SlotRegistry<HandlerCell<ServiceOf<D>>>,
	stopped: watch::Sender<bool>,
	seeded: bool,
	running: bool,
	stats: DispatchStats,
}

impl<D: ServiceDefinition> std::fmt::Debug for Server<D> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Server")
			.field("port", &self.listener.port())
			.field("live_handlers", &self.handlers.len())
			.field("running", &self.running)
			.field("stats", &self.stats)
			.finish_non_exhaustive()
	}
}

impl<D: ServiceDefinition> Server<D> {
	/// Binds a listener on every interface at `port` (0 picks any free port) and starts it.
	///
	/// The IPv6 wildcard is tried first, then the IPv4 one.
	///
	/// # Errors
	///
	/// Returns the transport error of the last bind attempt.
	pub fn build_service(definition: D, port: u16) -> Result<Self, RpcError> {
		let candidates = [
			SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
			SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
		];
		let mut last = None;
		for addr in candidates {
			match Self::try_bind(&definition, addr) {
				Ok(parts) => return Ok(Self::from_parts(definition, parts)),
				Err(e) => {
					debug!(addr = %addr, error = %e, "rpc.server.bind_failed");
					last = Some(e);
				}
			}
		}
		Err(last.unwrap_or(TransportError::Closed).into())
	}

	/// Binds a listener at exactly `addr` and starts it.
	///
	/// # Errors
	///
	/// Returns the transport error when `addr` cannot be bound.
	pub fn build_service_at(definition: D, addr: SocketAddr) -> Result<Self, RpcError> {
		let parts = Self::try_bind(&definition, addr)?;
		Ok(Self::from_parts(definition, parts))
	}

	fn try_bind(definition: &D, addr: SocketAddr) -> Result<(ListenerOf<D>, CompletionQueue), TransportError> {
		let mut builder = definition.builder();
		builder.add_listening_port(addr);
		definition.register_service(&mut builder);
		let queue = CompletionQueue::new();
		let listener = builder.build_and_start(queue.completer())?;
		Ok((listener, queue))
	}

	fn from_parts(definition: D, (listener, queue): (ListenerOf<D>, CompletionQueue)) -> Self {
		info!(port = listener.port(), "rpc.server.listening");
		let completer = queue.completer();
		let (stopped, _) = watch::channel(true);
		Self {
			definition,
			listener: Arc::new(listener),
			queue,
			completer,
			handlers: SlotRegistry::new(),
			stopped,
			seeded: false,
			running: false,
			stats: DispatchStats::default(),
		}
	}

	/// Port the listener is bound to.
	pub fn port(&self) -> u16 {
		self.listener.port()
	}

	/// The running listener.
	pub fn listener(&self) -> &ListenerOf<D> {
		&self.listener
	}

	/// The service definition.
	pub fn definition(&self) -> &D {
		&self.definition
	}

	/// Returns true while the dispatch loop runs.
	pub fn is_running(&self) -> bool {
		self.running
	}

	/// Returns true when no dispatch loop is running.
	pub fn is_stopped(&self) -> bool {
		*self.stopped.borrow()
	}

	/// Number of registered handlers, standing acceptors included.
	pub fn live_handlers(&self) -> usize {
		self.handlers.len()
	}

	/// Dispatch counters.
	pub fn stats(&self) -> DispatchStats {
		self.stats
	}

	/// Returns a handle for stopping the server from other tasks.
	pub fn handle(&self) -> ServerHandle<ListenerOf<D>> {
		ServerHandle {
			listener: Arc::clone(&self.listener),
			shutdown: self.queue.shutdown_handle(),
			stopped: self.stopped.subscribe(),
		}
	}

	/// Seeds one standing acceptor per request type. Idempotent.
	pub fn spawn_handlers(&mut self) {
		if self.seeded || self.queue.is_shutdown() {
			return;
		}
		self.seeded = true;
		let mut spawner = Spawner::new();
		self.definition.spawn_handlers(&mut spawner);
		debug!(count = spawner.handlers.len(), "rpc.server.seed");
		for handler in spawner.handlers {
			self.register(handler);
		}
	}

	/// Runs the dispatch loop until shutdown, then drains the queue and releases every
	/// remaining handler. Seeds the initial handlers first if that has not happened yet.
	pub async fn start(&mut self) {
		if self.running || self.queue.is_drained() {
			return;
		}
		self.spawn_handlers();
		self.running = true;
		self.stopped.send_replace(false);
		info!(port = self.port(), handlers = self.handlers.len(), "rpc.server.start");

		while let Some(event) = self.queue.next().await {
			self.dispatch(event);
		}

		self.release_all();
		self.running = false;
		self.stopped.send_replace(true);
		info!(port = self.port(), stats = ?self.stats, "rpc.server.stopped");
	}

	/// Moves the server onto its own task and returns a handle to it.
	pub fn spawn(mut self) -> ServerHandle<ListenerOf<D>> {
		let handle = self.handle();
		if !self.queue.is_drained() {
			self.stopped.send_replace(false);
		}
		tokio::spawn(async move {
			self.start().await;
		});
		handle
	}

	fn register(&mut self, handler: Box<dyn Handler<ServiceOf<D>>>) {
		let tag = match self.handlers.insert(HandlerCell::new(handler)) {
			Ok(tag) => tag,
			Err(e) => {
				error!(error = %e, "rpc.server.spawn_failed");
				return;
			}
		};
		self.stats.spawned += 1;
		let cx = HandlerContext {
			tag,
			service: self.listener.service(),
			completer: &self.completer,
		};
		if let Some(cell) = self.handlers.get_mut(tag) {
			trace!(tag = %tag, handler = cell.name(), "rpc.server.spawn");
			if let Err(e) = cell.proceed(Outcome::Ok, &cx) {
				error!(tag = %tag, error = %e, "rpc.server.stage_failed");
			}
		}
	}

	fn dispatch(&mut self, event: Event) {
		let cx = HandlerContext {
			tag: event.tag,
			service: self.listener.service(),
			completer: &self.completer,
		};
		let Some(cell) = self.handlers.get_mut(event.tag) else {
			self.stats.stale += 1;
			error!(tag = %event.tag, outcome = event.outcome.as_str(), "rpc.server.stale_tag");
			return;
		};
		self.stats.dispatched += 1;
		trace!(tag = %event.tag, handler = cell.name(), state = ?cell.state(), outcome = event.outcome.as_str(), "rpc.server.proceed");

		match cell.proceed(event.outcome, &cx) {
			Ok(Step::Staged) => {}
			Ok(Step::Responded(successor)) => self.register(successor),
			Ok(Step::Done) => {
				if self.handlers.remove(event.tag).is_some() {
					self.stats.destroyed += 1;
				}
			}
			Err(e) => {
				self.stats.stale += 1;
				error!(tag = %event.tag, error = %e, "rpc.server.protocol_error");
			}
		}
	}

	fn release_all(&mut self) {
		self.listener.shutdown();
		self.queue.shutdown();
		let discarded = self.queue.drain();
		if discarded > 0 {
			debug!(discarded, "rpc.server.drained");
		}
		for (tag, cell) in self.handlers.drain() {
			trace!(tag = %tag, handler = cell.name(), state = ?cell.state(), "rpc.server.release");
			self.stats.destroyed += 1;
		}
	}
}

impl<D: ServiceDefinition> Drop for Server<D> {
	fn drop(&mut self) {
		if !self.queue.is_drained() {
			if self.running {
				warn!(port = self.port(), "rpc.server.dropped_while_running");
			}
			self.release_all();
			self.stopped.send_replace(true);
		}
	}
}

/// Cloneable handle to a [`Server`] that may be running on another task.
pub struct ServerHandle<L> {
	listener: Arc<L>,
	shutdown: ShutdownHandle,
	stopped: watch::Receiver<bool>,
}

impl<L> Clone for ServerHandle<L> {
	fn clone(&self) -> Self {
		Self {
			listener: Arc::clone(&self.listener),
			shutdown: self.shutdown.clone(),
			stopped: self.stopped.clone(),
		}
	}
}

impl<L: Listener> std::fmt::Debug for ServerHandle<L> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerHandle")
			.field("port", &self.listener.port())
			.field("stopped", &*self.stopped.borrow())
			.finish()
	}
}

impl<L: Listener> ServerHandle<L> {
	/// Port the listener is bound to.
	pub fn port(&self) -> u16 {
		self.listener.port()
	}

	/// The running listener.
	pub fn listener(&self) -> &L {
		&self.listener
	}

	/// Shuts the listener down, then the queue, and waits until the loop has exited.
	///
	/// Idempotent.
	pub async fn stop(&self) {
		self.listener.shutdown();
		self.shutdown.shutdown();
		let mut stopped = self.stopped.clone();
		let _ = stopped.wait_for(|stopped| *stopped).await;
	}

	/// Returns true when no dispatch loop is running.
	pub fn is_stopped(&self) -> bool {
		*self.stopped.borrow()
	}
}

//! In-memory transport doubles for exercising the drivers.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::call::{Call, CallContext, CallStart};
use crate::error::TransportError;
use crate::handler::{Handler, HandlerContext};
use crate::queue::{Completer, Outcome, Tag};
use crate::server::{ServiceDefinition, Spawner};
use crate::status::RpcStatus;
use crate::transport::{Listener, ListenerBuilder, Stub};

/// Ordered log shared between a test and the objects it drives.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
	pub fn push(&self, entry: impl Into<String>) {
		self.0.lock().unwrap().push(entry.into());
	}

	pub fn entries(&self) -> Vec<String> {
		self.0.lock().unwrap().clone()
	}

	pub async fn wait_for(&self, entry: &str) {
		eventually(|| self.entries().iter().any(|e| e == entry)).await;
	}
}

/// Polls `cond` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
	let waited = tokio::time::timeout(Duration::from_secs(2), async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await;
	assert!(waited.is_ok(), "condition not reached in time");
}

#[derive(Debug)]
pub(crate) struct MockStub;

impl Stub for MockStub {
	fn connect(uri: &str) -> Result<Self, TransportError> {
		if uri.is_empty() {
			return Err(TransportError::InvalidUri(uri.to_owned()));
		}
		Ok(Self)
	}
}

/// Call that journals every hook it receives.
pub(crate) struct ScriptedCall {
	name: &'static str,
	journal: Journal,
	context: CallContext,
	replies: usize,
	keep_alive_for: usize,
	complete_on_cancel: bool,
}

impl ScriptedCall {
	pub fn boxed(name: &'static str, journal: &Journal) -> Box<Self> {
		Box::new(Self {
			name,
			journal: journal.clone(),
			context: CallContext::new(),
			replies: 0,
			keep_alive_for: 0,
			complete_on_cancel: false,
		})
	}

	pub fn keep_alive_for(mut self: Box<Self>, replies: usize) -> Box<Self> {
		self.keep_alive_for = replies;
		self
	}

	pub fn complete_on_cancel(mut self: Box<Self>) -> Box<Self> {
		self.complete_on_cancel = true;
		self
	}
}

impl Call<MockStub> for ScriptedCall {
	fn start(&mut self, cx: CallStart<'_, MockStub>) {
		self.journal.push(format!("start {}", self.name));
		if self.complete_on_cancel {
			let token = self.context.cancel_token().clone();
			let completer = cx.completer.clone();
			let tag = cx.tag;
			tokio::spawn(async move {
				token.cancelled().await;
				let _ = completer.complete(tag, Outcome::Cancelled);
			});
		}
	}

	fn process_reply(&mut self, outcome: Outcome) {
		self.replies += 1;
		self.journal.push(format!("reply {} {}", self.name, outcome.as_str()));
	}

	fn keep_alive(&self) -> bool {
		self.replies <= self.keep_alive_for
	}

	fn destroy(self: Box<Self>) {
		self.journal.push(format!("destroy {}", self.name));
	}

	fn context(&self) -> &CallContext {
		&self.context
	}
}

static NEXT_PORT: AtomicU16 = AtomicU16::new(41000);

#[derive(Debug, Default)]
struct ServiceState {
	acceptors: VecDeque<Tag>,
	responses: Vec<Tag>,
}

/// Method table that lets the test decide when requests and sends complete.
#[derive(Debug, Clone)]
pub(crate) struct MockService {
	state: Arc<Mutex<ServiceState>>,
	completer: Completer,
}

impl MockService {
	pub fn request(&self, tag: Tag) {
		self.state.lock().unwrap().acceptors.push_back(tag);
	}

	pub fn respond(&self, tag: Tag) {
		self.state.lock().unwrap().responses.push(tag);
	}

	pub fn pending_acceptors(&self) -> Vec<Tag> {
		self.state.lock().unwrap().acceptors.iter().copied().collect()
	}

	/// Completes the oldest acceptor as if a request arrived.
	pub fn deliver(&self) -> Option<Tag> {
		let tag = self.state.lock().unwrap().acceptors.pop_front()?;
		self.completer.complete(tag, Outcome::Ok).ok()?;
		Some(tag)
	}

	/// Completes every armed response send.
	pub fn flush_responses(&self) -> usize {
		let tags: Vec<_> = self.state.lock().unwrap().responses.drain(..).collect();
		for tag in &tags {
			let _ = self.completer.complete(*tag, Outcome::Ok);
		}
		tags.len()
	}
}

#[derive(Debug)]
pub(crate) struct MockListener {
	port: u16,
	service: MockService,
}

impl Listener for MockListener {
	type Service = MockService;

	fn port(&self) -> u16 {
		self.port
	}

	fn service(&self) -> &MockService {
		&self.service
	}

	fn shutdown(&self) {
		let acceptors: Vec<_> = self.service.state.lock().unwrap().acceptors.drain(..).collect();
		for tag in acceptors {
			let _ = self.service.completer.complete(tag, Outcome::Cancelled);
		}
	}
}

#[derive(Debug, Default)]
pub(crate) struct MockListenerBuilder {
	addrs: Vec<SocketAddr>,
	methods: Vec<&'static str>,
}

impl ListenerBuilder for MockListenerBuilder {
	type Listener = MockListener;

	fn add_listening_port(&mut self, addr: SocketAddr) {
		self.addrs.push(addr);
	}

	fn register_method(&mut self, method: &'static str) {
		self.methods.push(method);
	}

	fn build_and_start(self, completer: Completer) -> Result<MockListener, TransportError> {
		let addr = self.addrs.first().ok_or(TransportError::Closed)?;
		let port = match addr.port() {
			0 => NEXT_PORT.fetch_add(1, Ordering::Relaxed),
			port => port,
		};
		Ok(MockListener {
			port,
			service: MockService {
				state: Arc::default(),
				completer,
			},
		})
	}
}

/// Construction and destruction counters shared by every [`CountingHandler`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub created: AtomicUsize,
	pub destroyed: AtomicUsize,
	pub processed: AtomicUsize,
}

impl Counters {
	pub fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}

	pub fn destroyed(&self) -> usize {
		self.destroyed.load(Ordering::SeqCst)
	}

	pub fn processed(&self) -> usize {
		self.processed.load(Ordering::SeqCst)
	}
}

pub(crate) struct CountingHandler {
	counters: Arc<Counters>,
	fail: bool,
	last_status: Arc<Mutex<Option<RpcStatus>>>,
}

impl CountingHandler {
	pub fn new(counters: &Arc<Counters>) -> Self {
		counters.created.fetch_add(1, Ordering::SeqCst);
		Self {
			counters: Arc::clone(counters),
			fail: false,
			last_status: Arc::default(),
		}
	}

	pub fn failing(counters: &Arc<Counters>, last_status: &Arc<Mutex<Option<RpcStatus>>>) -> Self {
		let mut handler = Self::new(counters);
		handler.fail = true;
		handler.last_status = Arc::clone(last_status);
		handler
	}
}

impl Drop for CountingHandler {
	fn drop(&mut self) {
		self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
	}
}

impl Handler<MockService> for CountingHandler {
	fn stage(&mut self, cx: &HandlerContext<'_, MockService>) {
		cx.service.request(cx.tag);
	}

	fn respawn(&self) -> Box<dyn Handler<MockService>> {
		let mut next = Self::new(&self.counters);
		next.fail = self.fail;
		next.last_status = Arc::clone(&self.last_status);
		Box::new(next)
	}

	fn process_request(&mut self) -> Result<(), RpcStatus> {
		self.counters.processed.fetch_add(1, Ordering::SeqCst);
		if self.fail {
			return Err(RpcStatus::internal("request logic failed"));
		}
		Ok(())
	}

	fn finish(&mut self, cx: &HandlerContext<'_, MockService>, status: RpcStatus) {
		*self.last_status.lock().unwrap() = Some(status);
		cx.service.respond(cx.tag);
	}
}

/// Service definition with a single request type served by [`CountingHandler`].
#[derive(Debug, Default)]
pub(crate) struct CountingService {
	pub counters: Arc<Counters>,
}

impl ServiceDefinition for CountingService {
	type Builder = MockListenerBuilder;

	fn builder(&self) -> MockListenerBuilder {
		MockListenerBuilder::default()
	}

	fn register_service(&self, builder: &mut MockListenerBuilder) {
		builder.register_method("Bar");
	}

	fn spawn_handlers(&self, spawner: &mut Spawner<MockService>) {
		spawner.spawn(CountingHandler::new(&self.counters));
	}
}

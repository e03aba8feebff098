//! Outbound driver: one queue, one stub, any number of in-flight calls.

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use crate::call::{Call, CallStart};
use crate::error::{QueueError, RegistryError, RpcError};
use crate::queue::{Completer, CompletionQueue, DispatchStats, Event, Outcome, ShutdownHandle, Tag};
use crate::slots::SlotRegistry;
use crate::transport::Stub;

type BoxCall<S> = Box<dyn Call<S>>;

enum Wake<S: 'static> {
	Submitted(BoxCall<S>),
	Completed(Option<Event>),
}

/// Asynchronous client owning a completion queue and a stub.
///
/// Calls are owned by the client from [`Client::add_call`] until the dispatch loop handles
/// their terminal completion. Nothing else may release them.
pub struct Client<S: Stub> {
	uri: String,
	stub: S,
	queue: CompletionQueue,
	completer: Completer,
	calls: SlotRegistry<BoxCall<S>>,
	inbox_tx: mpsc::UnboundedSender<BoxCall<S>>,
	inbox: mpsc::UnboundedReceiver<BoxCall<S>>,
	stopped: watch::Sender<bool>,
	running: bool,
	stats: DispatchStats,
}

impl<S: Stub> std::fmt::Debug for Client<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client")
			.field("uri", &self.uri)
			.field("live_calls", &self.calls.len())
			.field("running", &self.running)
			.field("stats", &self.stats)
			.finish_non_exhaustive()
	}
}

impl<S: Stub> Client<S> {
	/// Opens a channel to `uri`. No I/O happens until the first call starts.
	///
	/// # Errors
	///
	/// Returns the stub's error when `uri` is unusable.
	pub fn new(uri: impl Into<String>) -> Result<Self, RpcError> {
		let uri = uri.into();
		let stub = S::connect(&uri)?;
		Ok(Self::with_stub(uri, stub))
	}

	/// Creates a client around an already opened stub.
	pub fn with_stub(uri: impl Into<String>, stub: S) -> Self {
		let queue = CompletionQueue::new();
		let completer = queue.completer();
		let (inbox_tx, inbox) = mpsc::unbounded_channel();
		let (stopped, _) = watch::channel(true);
		Self {
			uri: uri.into(),
			stub,
			queue,
			completer,
			calls: SlotRegistry::new(),
			inbox_tx,
			inbox,
			stopped,
			running: false,
			stats: DispatchStats::default(),
		}
	}

	/// URI the channel was opened with.
	pub fn uri(&self) -> &str {
		&self.uri
	}

	/// The stub calls are started against.
	pub fn stub(&self) -> &S {
		&self.stub
	}

	/// Producer for this client's queue, for transports and timers driven from outside.
	pub fn completer(&self) -> Completer {
		self.completer.clone()
	}

	/// Returns true while the dispatch loop runs.
	pub fn is_running(&self) -> bool {
		self.running
	}

	/// Returns true when no dispatch loop is running.
	pub fn is_stopped(&self) -> bool {
		*self.stopped.borrow()
	}

	/// Number of calls awaiting completions.
	pub fn live_calls(&self) -> usize {
		self.calls.len()
	}

	/// Dispatch counters.
	pub fn stats(&self) -> DispatchStats {
		self.stats
	}

	/// Returns a handle for submitting calls and stopping the loop from other tasks.
	pub fn handle(&self) -> ClientHandle<S> {
		ClientHandle {
			inbox: self.inbox_tx.clone(),
			shutdown: self.queue.shutdown_handle(),
			stopped: self.stopped.subscribe(),
		}
	}

	/// Takes ownership of `call` and starts it immediately.
	///
	/// # Errors
	///
	/// Fails when the queue is shut down or no slot is free. The call then receives its
	/// terminal [`Call::process_reply`] before this returns.
	pub fn add_call(&mut self, call: BoxCall<S>) -> Result<Tag, RpcError> {
		if self.queue.is_shutdown() {
			settle(call, Outcome::Shutdown);
			return Err(QueueError::ShutDown.into());
		}
		if self.calls.is_full() {
			settle(call, Outcome::Failed);
			return Err(RegistryError::Full.into());
		}

		let tag = self.calls.insert(call)?;
		self.stats.spawned += 1;
		if let Some(call) = self.calls.get_mut(tag) {
			trace!(tag = %tag, call = call.name(), "rpc.client.start_call");
			call.start(CallStart {
				stub: &self.stub,
				tag,
				completer: &self.completer,
			});
		}
		Ok(tag)
	}

	/// Runs the dispatch loop until shutdown, then drains the queue.
	///
	/// Every call still registered when the loop ends receives one terminal
	/// [`Outcome::Shutdown`] reply. A client runs at most once; later calls return
	/// immediately.
	pub async fn start(&mut self) {
		if self.running || self.queue.is_drained() {
			return;
		}
		self.running = true;
		self.stopped.send_replace(false);
		info!(uri = %self.uri, "rpc.client.start");

		loop {
			let wake = tokio::select! {
				biased;
				Some(call) = self.inbox.recv() => Wake::Submitted(call),
				event = self.queue.next() => Wake::Completed(event),
			};
			match wake {
				Wake::Submitted(call) => {
					if let Err(e) = self.add_call(call) {
						debug!(error = %e, "rpc.client.submit_rejected");
					}
				}
				Wake::Completed(Some(event)) => self.dispatch(event),
				Wake::Completed(None) => break,
			}
		}

		self.settle_all();
		self.running = false;
		self.stopped.send_replace(true);
		info!(uri = %self.uri, stats = ?self.stats, "rpc.client.stopped");
	}

	/// Moves the client onto its own task and returns a handle to it.
	pub fn spawn(mut self) -> ClientHandle<S> {
		let handle = self.handle();
		if !self.queue.is_drained() {
			self.stopped.send_replace(false);
		}
		tokio::spawn(async move {
			self.start().await;
			self.stopped.send_replace(true);
		});
		handle
	}

	fn dispatch(&mut self, event: Event) {
		let Some(call) = self.calls.get_mut(event.tag) else {
			self.stats.stale += 1;
			error!(tag = %event.tag, outcome = event.outcome.as_str(), "rpc.client.stale_tag");
			return;
		};
		self.stats.dispatched += 1;
		trace!(tag = %event.tag, call = call.name(), outcome = event.outcome.as_str(), "rpc.client.reply");
		call.process_reply(event.outcome);

		if !call.keep_alive()
			&& let Some(call) = self.calls.remove(event.tag)
		{
			self.stats.destroyed += 1;
			call.destroy();
		}
	}

	fn settle_all(&mut self) {
		self.queue.shutdown();
		let discarded = self.queue.drain();
		if discarded > 0 {
			debug!(discarded, "rpc.client.drained");
		}
		while let Ok(call) = self.inbox.try_recv() {
			settle(call, Outcome::Shutdown);
		}
		for (tag, call) in self.calls.drain() {
			trace!(tag = %tag, call = call.name(), "rpc.client.settle");
			self.stats.destroyed += 1;
			settle(call, Outcome::Shutdown);
		}
	}
}

impl<S: Stub> Drop for Client<S> {
	fn drop(&mut self) {
		if !self.queue.is_drained() {
			self.settle_all();
			self.stopped.send_replace(true);
		}
	}
}

/// Gives a call its terminal reply and releases it.
fn settle<S: 'static>(mut call: BoxCall<S>, outcome: Outcome) {
	call.process_reply(outcome);
	call.destroy();
}

/// Cloneable handle to a [`Client`] that may be running on another task.
pub struct ClientHandle<S: 'static> {
	inbox: mpsc::UnboundedSender<BoxCall<S>>,
	shutdown: ShutdownHandle,
	stopped: watch::Receiver<bool>,
}

impl<S: 'static> Clone for ClientHandle<S> {
	fn clone(&self) -> Self {
		Self {
			inbox: self.inbox.clone(),
			shutdown: self.shutdown.clone(),
			stopped: self.stopped.clone(),
		}
	}
}

impl<S: 'static> std::fmt::Debug for ClientHandle<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientHandle")
			.field("shutdown", &self.shutdown.is_shutdown())
			.field("stopped", &*self.stopped.borrow())
			.finish()
	}
}

impl<S: Stub> ClientHandle<S> {
	/// Hands `call` to the dispatch loop, which starts it on its own task.
	///
	/// # Errors
	///
	/// Fails once shutdown was requested; the call receives its terminal reply first.
	pub fn add_call(&self, call: BoxCall<S>) -> Result<(), RpcError> {
		if self.shutdown.is_shutdown() {
			settle(call, Outcome::Shutdown);
			return Err(QueueError::ShutDown.into());
		}
		self.inbox.send(call).map_err(|mpsc::error::SendError(call)| {
			settle(call, Outcome::Shutdown);
			RpcError::from(QueueError::ShutDown)
		})
	}

	/// Requests shutdown and waits until the loop has drained and exited.
	///
	/// Idempotent. Returns immediately for a client whose loop never started.
	pub async fn stop(&self) {
		self.shutdown.shutdown();
		let mut stopped = self.stopped.clone();
		let _ = stopped.wait_for(|stopped| *stopped).await;
	}

	/// Returns true when no dispatch loop is running.
	pub fn is_stopped(&self) -> bool {
		*self.stopped.borrow()
	}
}

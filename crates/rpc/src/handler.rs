//! Inbound unit of work and its three-state machine.
//!
//! A handler lives through exactly three transitions:
//!
//! 1. `Create` (inline, at registration): stage an acceptor for the next matching request.
//! 2. `Process` (request arrived): respawn a successor, run the request logic, arm the reply.
//! 3. `Finish` (reply sent): release.
//!
//! [`HandlerCell`] owns the state and rejects any transition attempted after the terminal
//! state, so a late or duplicated event cannot re-enter a finished handler.

use tracing::{trace, warn};

use crate::error::ProtocolError;
use crate::queue::{Completer, Outcome, Tag};
use crate::status::RpcStatus;

/// Handler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
	/// Constructed, acceptor not yet staged.
	Create,
	/// Waiting for the request to arrive.
	Process,
	/// Waiting for the reply send to complete.
	Finish,
	/// Terminal; the driver releases the handler.
	Done,
}

/// What a handler needs to stage operations against the listener.
#[derive(Debug)]
pub struct HandlerContext<'a, Svc> {
	/// Tag to attach to every operation this handler arms.
	pub tag: Tag,
	/// Method table of the listener.
	pub service: &'a Svc,
	/// Producer for the server's queue.
	pub completer: &'a Completer,
}

/// One inbound RPC's processing unit.
pub trait Handler<Svc>: Send + 'static {
	/// Registers with `cx.service` to receive the next matching request under `cx.tag`.
	fn stage(&mut self, cx: &HandlerContext<'_, Svc>);

	/// Builds the successor that keeps an acceptor standing for this request type.
	fn respawn(&self) -> Box<dyn Handler<Svc>>;

	/// Runs the request logic and prepares the response.
	///
	/// # Errors
	///
	/// The returned status is attached to the response; the reply is still sent.
	fn process_request(&mut self) -> Result<(), RpcStatus>;

	/// Arms sending the response with `status` under `cx.tag`.
	fn finish(&mut self, cx: &HandlerContext<'_, Svc>, status: RpcStatus);

	/// Name used in logs.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

/// Result of one [`HandlerCell::proceed`].
pub enum Step<Svc: 'static> {
	/// The acceptor was staged.
	Staged,
	/// The request was processed and the reply armed; the successor must be registered.
	Responded(Box<dyn Handler<Svc>>),
	/// The handler is finished and must be released.
	Done,
}

impl<Svc: 'static> std::fmt::Debug for Step<Svc> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Staged => f.write_str("Staged"),
			Self::Responded(successor) => f.debug_tuple("Responded").field(&successor.name()).finish(),
			Self::Done => f.write_str("Done"),
		}
	}
}

/// A handler together with its lifecycle state.
pub struct HandlerCell<Svc: 'static> {
	state: HandlerState,
	handler: Box<dyn Handler<Svc>>,
}

impl<Svc: 'static> std::fmt::Debug for HandlerCell<Svc> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandlerCell")
			.field("state", &self.state)
			.field("handler", &self.handler.name())
			.finish()
	}
}

impl<Svc: 'static> HandlerCell<Svc> {
	/// Wraps a freshly constructed handler in the `Create` state.
	pub fn new(handler: Box<dyn Handler<Svc>>) -> Self {
		Self {
			state: HandlerState::Create,
			handler,
		}
	}

	/// Current state.
	pub fn state(&self) -> HandlerState {
		self.state
	}

	/// Name of the wrapped handler.
	pub fn name(&self) -> &'static str {
		self.handler.name()
	}

	/// Advances the state machine by one step.
	///
	/// `outcome` is ignored for the inline `Create` step. A failed request-arrival
	/// completion means the acceptor was abandoned: the handler ends without respawning.
	///
	/// # Errors
	///
	/// Returns [`ProtocolError::Terminal`] when called in the `Done` state; nothing changes.
	pub fn proceed(&mut self, outcome: Outcome, cx: &HandlerContext<'_, Svc>) -> Result<Step<Svc>, ProtocolError> {
		match self.state {
			HandlerState::Create => {
				self.handler.stage(cx);
				self.state = HandlerState::Process;
				Ok(Step::Staged)
			}
			HandlerState::Process if !outcome.is_ok() => {
				trace!(tag = %cx.tag, handler = self.name(), outcome = outcome.as_str(), "rpc.handler.abandoned");
				self.state = HandlerState::Done;
				Ok(Step::Done)
			}
			HandlerState::Process => {
				let successor = self.handler.respawn();
				let status = match self.handler.process_request() {
					Ok(()) => RpcStatus::ok(),
					Err(status) => {
						warn!(tag = %cx.tag, handler = self.name(), status = %status, "rpc.handler.request_failed");
						status
					}
				};
				self.handler.finish(cx, status);
				self.state = HandlerState::Finish;
				Ok(Step::Responded(successor))
			}
			HandlerState::Finish => {
				if !outcome.is_ok() {
					warn!(tag = %cx.tag, handler = self.name(), outcome = outcome.as_str(), "rpc.handler.reply_not_sent");
				}
				self.state = HandlerState::Done;
				Ok(Step::Done)
			}
			HandlerState::Done => Err(ProtocolError::Terminal { handler: self.name() }),
		}
	}
}

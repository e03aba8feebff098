//! Client side: the hello stub, its calls, and a small awaitable wrapper.

use std::marker::PhantomData;

use mondo_rpc::{Call, CallContext, CallStart, Client, ClientHandle, Outcome, Stub, TransportError};
use mondo_transport::{Channel, ReplySlot, decode, encode};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{HelloError, Result};
use crate::messages::{Input, LoginRequest, Output, SessionId};
use crate::service::{Endpoint, PollInOut, StartSession};

/// Client-side view of the hello service.
#[derive(Debug, Clone)]
pub struct HelloStub {
	channel: Channel,
}

impl HelloStub {
	/// The underlying channel.
	pub fn channel(&self) -> &Channel {
		&self.channel
	}
}

impl Stub for HelloStub {
	fn connect(uri: &str) -> std::result::Result<Self, TransportError> {
		Ok(Self {
			channel: Channel::new(uri)?,
		})
	}
}

/// Receives the result of one [`EndpointCall`].
pub type Pending<T> = oneshot::Receiver<Result<T>>;

/// Unary call of one [`Endpoint`], reporting through a oneshot.
pub struct EndpointCall<E: Endpoint> {
	payload: Option<Result<Vec<u8>>>,
	context: CallContext,
	reply: ReplySlot,
	done: Option<oneshot::Sender<Result<E::Response>>>,
	endpoint: PhantomData<fn() -> E>,
}

/// `StartSession` call.
pub type StartSessionCall = EndpointCall<StartSession>;

/// `PollInOut` call.
pub type PollInOutCall = EndpointCall<PollInOut>;

impl<E> EndpointCall<E>
where
	E: Endpoint,
	E::Request: serde::Serialize,
	E::Response: serde::de::DeserializeOwned + Send,
{
	/// Builds the call and the receiver its result is delivered to.
	pub fn new(request: &E::Request) -> (Box<Self>, Pending<E::Response>) {
		let (tx, rx) = oneshot::channel();
		let call = Box::new(Self {
			payload: Some(encode(request).map_err(HelloError::from)),
			context: CallContext::new(),
			reply: ReplySlot::new(),
			done: Some(tx),
			endpoint: PhantomData,
		});
		(call, rx)
	}

	fn report(&mut self, result: Result<E::Response>) {
		if let Some(done) = self.done.take() {
			let _ = done.send(result);
		}
	}
}

impl<E> Call<HelloStub> for EndpointCall<E>
where
	E: Endpoint,
	E::Request: serde::Serialize,
	E::Response: serde::de::DeserializeOwned + Send,
{
	fn start(&mut self, cx: CallStart<'_, HelloStub>) {
		match self.payload.take() {
			Some(Ok(payload)) => {
				cx.stub
					.channel()
					.start_unary(E::METHOD, payload, &self.context, self.reply.clone(), cx.tag, cx.completer);
			}
			Some(Err(e)) => {
				self.report(Err(e));
				let _ = cx.completer.complete(cx.tag, Outcome::Failed);
			}
			None => {
				let _ = cx.completer.complete(cx.tag, Outcome::Failed);
			}
		}
	}

	fn process_reply(&mut self, outcome: Outcome) {
		if self.done.is_none() {
			return;
		}
		let result = match (outcome, self.reply.take()) {
			(Outcome::Ok, Some(reply)) => {
				self.context.set_peer(reply.peer.to_string());
				match reply.result {
					Ok(payload) => decode(&payload).map_err(HelloError::from),
					Err(status) => {
						self.context.set_status(status.clone());
						Err(HelloError::Status(status))
					}
				}
			}
			(outcome, _) => Err(HelloError::NoReply(outcome)),
		};
		debug!(method = E::METHOD, ?outcome, ok = result.is_ok(), "hello.call.reply");
		self.report(result);
	}

	fn context(&self) -> &CallContext {
		&self.context
	}

	fn name(&self) -> &'static str {
		E::METHOD
	}
}

/// Awaitable front end over a running [`Client`].
#[derive(Debug, Clone)]
pub struct HelloClient {
	handle: ClientHandle<HelloStub>,
}

impl HelloClient {
	/// Opens a client to `uri` and runs its dispatch loop on a dedicated task.
	///
	/// # Errors
	///
	/// Fails when `uri` is malformed. No connection is attempted until the first call.
	pub fn connect(uri: &str) -> Result<Self> {
		let client = Client::<HelloStub>::new(uri)?;
		Ok(Self { handle: client.spawn() })
	}

	/// Opens a session.
	///
	/// # Errors
	///
	/// Fails when the server rejects the login or the call does not complete.
	pub async fn start_session(&self, user: &str, token: Option<String>) -> Result<Input> {
		let request = LoginRequest {
			user: user.to_owned(),
			token,
		};
		self.submit(StartSessionCall::new(&request)).await
	}

	/// Publishes `input` and collects whatever other sessions sent.
	///
	/// # Errors
	///
	/// Fails when the call does not complete; application errors arrive in [`Output::error`].
	pub async fn poll_in_out(&self, input: &Input) -> Result<Output> {
		self.submit(PollInOutCall::new(input)).await
	}

	/// Polls without publishing anything.
	///
	/// # Errors
	///
	/// As [`Self::poll_in_out`].
	pub async fn poll(&self, session_id: SessionId) -> Result<Output> {
		self.poll_in_out(&Input {
			session_id,
			blobs: Vec::new(),
		})
		.await
	}

	/// Stops the dispatch loop; outstanding calls fail with [`Outcome::Shutdown`].
	pub async fn stop(&self) {
		self.handle.stop().await;
	}

	async fn submit<C: Call<HelloStub>, T>(&self, (call, pending): (Box<C>, Pending<T>)) -> Result<T> {
		self.handle.add_call(call)?;
		pending.await.map_err(|_| HelloError::Dropped)?
	}
}

//! Server side: the hello method table and its handlers.

use std::marker::PhantomData;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use mondo_rpc::{
	Handler, HandlerContext, ListenerBuilder, Outcome, RpcStatus, Server, ServiceDefinition, Spawner, TransportError,
};
use mondo_transport::{AsyncService, IncomingRequest, IncomingSlot, TcpListenerBuilder, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::messages::{Input, LoginRequest, Output, POLL_IN_OUT, START_SESSION};
use crate::relay::Relay;

/// One unary method served by the relay.
pub trait Endpoint: Send + Sync + 'static {
	/// Method name on the wire.
	const METHOD: &'static str;
	/// Decoded request.
	type Request: DeserializeOwned;
	/// Encoded response.
	type Response: Serialize;

	/// Runs the method against the relay.
	///
	/// # Errors
	///
	/// The status is sent back instead of a response.
	fn call(relay: &Relay, request: Self::Request) -> Result<Self::Response, RpcStatus>;
}

/// `StartSession (LoginRequest) returns (Input)`.
#[derive(Debug)]
pub enum StartSession {}

impl Endpoint for StartSession {
	const METHOD: &'static str = START_SESSION;
	type Request = LoginRequest;
	type Response = Input;

	fn call(relay: &Relay, request: LoginRequest) -> Result<Input, RpcStatus> {
		relay.start_session(&request)
	}
}

/// `PollInOut (Input) returns (Output)`.
#[derive(Debug)]
pub enum PollInOut {}

impl Endpoint for PollInOut {
	const METHOD: &'static str = POLL_IN_OUT;
	type Request = Input;
	type Response = Output;

	fn call(relay: &Relay, request: Input) -> Result<Output, RpcStatus> {
		Ok(relay.poll_in_out(request))
	}
}

/// Standing handler for one [`Endpoint`].
pub struct EndpointHandler<E> {
	relay: Arc<Relay>,
	slot: IncomingSlot,
	request: Option<IncomingRequest>,
	reply: Vec<u8>,
	endpoint: PhantomData<fn() -> E>,
}

/// Handler serving `StartSession`.
pub type StartSessionHandler = EndpointHandler<StartSession>;

/// Handler serving `PollInOut`.
pub type PollInOutHandler = EndpointHandler<PollInOut>;

impl<E: Endpoint> EndpointHandler<E> {
	/// Creates a handler that has not staged its acceptor yet.
	pub fn new(relay: Arc<Relay>) -> Self {
		Self {
			relay,
			slot: IncomingSlot::new(),
			request: None,
			reply: Vec::new(),
			endpoint: PhantomData,
		}
	}
}

impl<E: Endpoint> Handler<AsyncService> for EndpointHandler<E> {
	fn stage(&mut self, cx: &HandlerContext<'_, AsyncService>) {
		cx.service.request(E::METHOD, cx.tag, self.slot.clone());
	}

	fn respawn(&self) -> Box<dyn Handler<AsyncService>> {
		Box::new(Self::new(Arc::clone(&self.relay)))
	}

	fn process_request(&mut self) -> Result<(), RpcStatus> {
		self.request = self.slot.take();
		let request = self.request.as_ref().ok_or_else(|| RpcStatus::internal("request slot empty"))?;
		trace!(method = E::METHOD, peer = %request.peer, "hello.request");
		if request.cancelled.is_cancelled() {
			return Err(RpcStatus::cancelled("client abandoned the request"));
		}
		let decoded: E::Request = decode(&request.payload).map_err(|e| RpcStatus::invalid_argument(e.to_string()))?;
		let response = E::call(&self.relay, decoded)?;
		self.reply = encode(&response).map_err(|e| RpcStatus::internal(e.to_string()))?;
		Ok(())
	}

	fn finish(&mut self, cx: &HandlerContext<'_, AsyncService>, status: RpcStatus) {
		match self.request.take() {
			Some(request) => request.responder.finish(std::mem::take(&mut self.reply), &status, cx.tag, cx.completer),
			None => {
				warn!(method = E::METHOD, tag = %cx.tag, "hello.finish_without_request");
				let _ = cx.completer.complete(cx.tag, Outcome::Failed);
			}
		}
	}

	fn name(&self) -> &'static str {
		E::METHOD
	}
}

/// The hello service: `StartSession` and `PollInOut` over TCP.
#[derive(Debug, Clone)]
pub struct HelloService {
	relay: Arc<Relay>,
}

impl HelloService {
	/// Creates the service around shared relay state.
	pub fn new(relay: Arc<Relay>) -> Self {
		Self { relay }
	}

	/// The relay the handlers operate on.
	pub fn relay(&self) -> &Arc<Relay> {
		&self.relay
	}

	/// Binds the service as configured and starts listening.
	///
	/// An empty host binds every interface.
	///
	/// # Errors
	///
	/// Fails when the host is not an IP address or the address cannot be bound.
	pub fn bind(self, config: &ServerConfig) -> Result<Server<Self>> {
		let host = config.host.trim().trim_start_matches('[').trim_end_matches(']');
		if host.is_empty() {
			return Ok(Server::build_service(self, config.port)?);
		}
		let ip: IpAddr = host
			.parse()
			.map_err(|_| TransportError::InvalidUri(config.host.clone()))?;
		Ok(Server::build_service_at(self, SocketAddr::new(ip, config.port))?)
	}
}

impl ServiceDefinition for HelloService {
	type Builder = TcpListenerBuilder;

	fn builder(&self) -> TcpListenerBuilder {
		TcpListenerBuilder::new()
	}

	fn register_service(&self, builder: &mut TcpListenerBuilder) {
		builder.register_method(START_SESSION);
		builder.register_method(POLL_IN_OUT);
	}

	fn spawn_handlers(&self, spawner: &mut Spawner<AsyncService>) {
		spawner.spawn(StartSessionHandler::new(Arc::clone(&self.relay)));
		spawner.spawn(PollInOutHandler::new(Arc::clone(&self.relay)));
	}
}

//! Completion-queue driven asynchronous RPC execution engine.
//!
//! One driver task multiplexes any number of in-flight calls through a single ordered
//! [`CompletionQueue`]. Every asynchronous operation is tagged with a [`Tag`], an integer
//! handle into a [`SlotRegistry`], and the driver resolves each delivered tag back to the
//! object that issued the operation.
//!
//! * [`Client`]: outbound driver, owns a queue plus a [`Stub`] and dispatches to [`Call`]s
//! * [`Server`]: inbound driver, owns a queue plus a [`Listener`] and advances [`Handler`]s
//! * [`HandlerCell`]: the self-checking `Create -> Process -> Finish` handler state machine
//! * [`transport`]: seams a concrete transport implements (channel stub, listener builder)
//!
//! The engine never interprets payloads. Wire format, framing and security belong to the
//! transport.

#![warn(missing_docs)]

pub mod call;
pub mod client;
pub mod error;
pub mod handler;
pub mod queue;
pub mod server;
pub mod slots;
pub mod status;
pub mod transport;

#[cfg(test)]
mod mock;

pub use call::{Call, CallContext, CallStart};
pub use client::{Client, ClientHandle};
pub use error::{ProtocolError, QueueError, RegistryError, Result, RpcError, TransportError};
pub use handler::{Handler, HandlerCell, HandlerContext, HandlerState, Step};
pub use queue::{Completer, CompletionQueue, DispatchStats, Event, Outcome, ShutdownHandle, Tag};
pub use server::{ServiceDefinition, ServiceOf, Server, ServerHandle, Spawner};
pub use slots::{IndexAllocator, SlotRegistry};
pub use status::{RpcStatus, StatusCode};
pub use transport::{Listener, ListenerBuilder, Stub};

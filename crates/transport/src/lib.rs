//! TCP transport for the mondo RPC engine.
//!
//! [`Channel`] implements [`mondo_rpc::Stub`] and [`TcpListenerBuilder`] implements
//! [`mondo_rpc::ListenerBuilder`]. Both ends exchange length-prefixed postcard [`Frame`]s over
//! a single TCP connection per channel; concurrent calls are multiplexed by request id.

#![warn(missing_docs)]

pub mod channel;
mod connection;
pub mod frame;
pub mod listener;
pub mod net;
pub mod slot;

pub use channel::{Channel, ReplySlot, UnaryReply};
pub use frame::{Frame, decode, encode};
pub use listener::{AsyncService, IncomingRequest, IncomingSlot, Responder, TcpListener, TcpListenerBuilder};
pub use slot::Slot;

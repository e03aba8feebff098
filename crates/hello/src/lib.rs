//! Session relay service built on the mondo RPC engine.
//!
//! Clients open a session with `StartSession` and then exchange [`Blob`]s with every other
//! live session through `PollInOut`. The server side is a [`HelloService`] driven by a
//! [`mondo_rpc::Server`]; the client side issues [`EndpointCall`]s through a
//! [`mondo_rpc::Client`], wrapped by [`HelloClient`].

#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod relay;
pub mod service;

pub use client::{EndpointCall, HelloClient, HelloStub, PollInOutCall, StartSessionCall};
pub use config::{ClientConfig, HelloConfig, LogConfig, ServerConfig};
pub use error::{HelloError, Result};
pub use messages::{Blob, Input, LoginRequest, Output, SessionId};
pub use relay::{DataExchange, Relay, SessionRegistry};
pub use service::{Endpoint, EndpointHandler, HelloService, PollInOut, PollInOutHandler, StartSession, StartSessionHandler};

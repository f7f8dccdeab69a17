//! # xpc-rpc
//!
//! A secure, type-safe RPC framework layered over a local Unix-domain-socket
//! transport. Four subsystems compose into the public API:
//!
//! - [`wire`] / [`codec`]: the tagged, self-describing value tree and the
//!   bidirectional codec mapping user types onto it.
//! - [`route`] / [`envelope`]: path-identified routes with typed
//!   message/reply/sequential-reply/error shapes, and the request/response
//!   wire envelopes built on top of them.
//! - [`trust`]: the composable peer-acceptor predicate gating every inbound
//!   message.
//! - [`server`] / [`client`]: the connection and request lifecycle managers
//!   built on the [`transport`] capability surface.

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod route;
pub mod server;
pub mod transport;
pub mod trust;
pub mod wire;

pub use client::{Client, ClientBuilder, ReplyStream};
pub use codec::{Decodable, Encodable};
pub use endpoint::EndpointHandle;
pub use envelope::{ErrorPayload, RequestEnvelope, ResponseEnvelope, ResponseOutcome};
pub use error::{HandlerError, Result, XpcError};
pub use route::{Route, RouteDescriptor};
pub use server::{Server, ServerBuilder};
pub use trust::Acceptor;
pub use wire::Value;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

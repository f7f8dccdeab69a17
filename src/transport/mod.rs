//! # Transport Capability Surface
//!
//! `spec.md` treats the underlying IPC transport as an external capability
//! surface (listener/connection lifecycle, message post/receive, peer-code
//! introspection) and the four core subsystems are written against that
//! abstraction rather than a concrete socket type. [`transport::uds`] is the
//! one concrete binding this crate ships, the same one-implementation-per-
//! abstraction shape the teacher uses for `IpcTransport`.

pub mod frame;
pub mod uds;

use async_trait::async_trait;

use crate::trust::PeerCredentials;
use crate::wire::Value;

/// The read half of an established connection.
#[async_trait]
pub trait TransportReader: Send {
    /// `Ok(None)` signals the peer closed the connection cleanly (the
    /// `peer-invalid` transport event).
    async fn receive(&mut self) -> std::io::Result<Option<Value>>;
}

/// The write half of an established connection.
#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, value: &Value) -> std::io::Result<()>;
}

/// A single established connection. Peer credentials are read once up
/// front (tokio's owned read/write halves, unlike the unsplit stream,
/// cannot report them); the server engine reads them before splitting a
/// connection into its independently-owned reader and writer, since a
/// handler dispatched for one message and a sequential-reply provider
/// emitting for another both need to write concurrently while a single
/// read loop keeps consuming incoming requests.
pub trait TransportConnection: Send {
    fn peer_credentials(&self) -> std::io::Result<PeerCredentials>;

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// A bound listener accepting new connections.
#[async_trait]
pub trait TransportListener: Send {
    async fn accept(&mut self) -> std::io::Result<Box<dyn TransportConnection>>;

    /// The socket path this listener is reachable at, used to mint
    /// endpoints. Anonymous listeners still have one internally (a
    /// generated temporary path, unadvertised in any named-service
    /// registry) but it is not a stable, caller-chosen name.
    fn socket_path(&self) -> &std::path::Path;
}

/// Factory for listeners and outbound connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn bind_named(&self, path: &std::path::Path) -> std::io::Result<Box<dyn TransportListener>>;
    async fn bind_anonymous(&self) -> std::io::Result<Box<dyn TransportListener>>;
    async fn connect(&self, path: &std::path::Path) -> std::io::Result<Box<dyn TransportConnection>>;
}

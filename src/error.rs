//! # Error Taxonomy
//!
//! Structured, matchable error types for every layer of the framework,
//! following the `thiserror`-based style used by `nano`'s `ErrorKind` rather
//! than the application-level `anyhow::Error` the teacher benchmark binary
//! uses for its own CLI glue.
//!
//! [`CodecError`] is produced by [`crate::codec`] and the wire value model;
//! [`HandlerError`] wraps a user handler's thrown error for transmission;
//! [`XpcError`] is the top-level error observed by server error hooks and
//! client completion handlers, matching the kinds enumerated by the
//! specification's error-handling design.

use std::sync::Arc;

use crate::route::Route;
use crate::wire::Value;

/// A declared error type reconstructed from a [`HandlerError`]'s
/// `underlying` value on the client side. Object-safe so a route's
/// `throws_type::<E>()` calls can be stored as `Arc<dyn ReconstructedError>`
/// without the caller needing to know which one matched up front;
/// [`HandlerError::reconstructed_as`] downcasts back to a concrete `E`.
pub trait ReconstructedError: std::any::Any + Send + Sync {
    fn as_any(&self) -> &dyn std::any::Any;
    fn fmt_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
    fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

impl<T> ReconstructedError for T
where
    T: std::any::Any + std::fmt::Display + std::fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn fmt_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }

    fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl std::fmt::Display for dyn ReconstructedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_display(f)
    }
}

impl std::fmt::Debug for dyn ReconstructedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_debug(f)
    }
}

/// Errors produced while encoding or decoding between user types and the
/// wire value tree.
#[derive(Debug, thiserror::Error, Clone)]
pub enum CodecError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("key not found: {0:?}")]
    KeyNotFound(String),

    #[error("value not found")]
    ValueNotFound,

    #[error("data corrupted: {0}")]
    DataCorrupted(String),

    /// A transport-only value (endpoint, file-descriptor container, direct
    /// connection handle) was offered to a coder other than the framework's.
    #[error("this value can only be encoded by the framework's own coder")]
    OnlyEncodableByFramework,

    #[error("this value can only be decoded by the framework's own coder")]
    OnlyDecodableByFramework,
}

impl From<crate::wire::WireError> for CodecError {
    fn from(err: crate::wire::WireError) -> Self {
        match err {
            crate::wire::WireError::TypeMismatch { expected, found } => {
                CodecError::TypeMismatch { expected, found }
            }
            crate::wire::WireError::KeyNotFound(key) => {
                CodecError::KeyNotFound(key.to_string_lossy().into_owned())
            }
        }
    }
}

/// A handler-thrown error, wrapped for transmission to the client.
///
/// Carries the original error's localized description and a type-name tag
/// (used to disambiguate enum variants with identical case names across
/// error types) and, when the concrete error type was declared on the route,
/// the error re-encoded as itself so the client can reconstruct it exactly.
#[derive(Clone)]
pub struct HandlerError {
    pub localized_description: String,
    pub type_name: String,
    pub underlying: Option<Value>,
    /// `underlying` decoded back into whichever of the route's
    /// `throws_type::<E>()` declarations uniquely accepted it. Set by the
    /// client while handling a response; always `None` on the server side.
    pub reconstructed: Option<Arc<dyn ReconstructedError>>,
}

impl HandlerError {
    /// Downcasts the reconstructed declared error back to `E`, returning
    /// `None` if reconstruction didn't run, didn't find a unique match, or
    /// matched a different declared type than `E`.
    pub fn reconstructed_as<E: 'static>(&self) -> Option<&E> {
        self.reconstructed.as_ref()?.as_any().downcast_ref::<E>()
    }
}

impl std::fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerError")
            .field("localized_description", &self.localized_description)
            .field("type_name", &self.type_name)
            .field("underlying", &self.underlying)
            .field("reconstructed", &self.reconstructed.as_deref())
            .finish()
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.localized_description)
    }
}

impl std::error::Error for HandlerError {}

/// The top-level error taxonomy surfaced to server error hooks and client
/// completion handlers.
#[derive(Debug, thiserror::Error, Clone)]
pub enum XpcError {
    #[error("peer is no longer valid")]
    PeerInvalid,

    #[error("peer connection was interrupted")]
    PeerInterrupted,

    #[error("listener is about to terminate")]
    ImminentTermination,

    #[error("unrecognized transport event")]
    UnknownEvent,

    #[error("peer-trust predicate refused the message")]
    Insecure,

    #[error("client is misconfigured")]
    MisconfiguredClient,

    #[error("server is misconfigured: {detail}")]
    MisconfiguredServer { detail: String },

    #[error("encoding error: {0}")]
    Encoding(CodecErrorForDisplay),

    #[error("decoding error: {0}")]
    Decoding(CodecErrorForDisplay),

    #[error("route not registered: {0}")]
    RouteNotRegistered(Route),

    #[error("route already registered: {0}")]
    RouteAlreadyRegistered(Route),

    #[error("route mismatch on {route}: {detail}")]
    RouteMismatch { route: Route, detail: String },

    #[error("a server for this name already exists with different peer-trust requirements")]
    ConflictingClientRequirements,

    #[error("handler error: {0}")]
    Handler(HandlerErrorForDisplay),

    #[error("sequential-reply provider is already finished")]
    SequenceFinished,

    #[error("client is not connected")]
    ClientNotConnected,

    #[error("connection cannot be re-established for an endpoint-derived client")]
    ConnectionCannotBeReestablished,

    #[error("{0}")]
    Other(String),

    #[error("unknown error")]
    Unknown,
}

/// Newtype wrappers so `CodecError`/`HandlerError` can participate in
/// `#[from]` conversions without colliding on `Encoding`/`Decoding` having
/// distinct wire meanings (encode vs. decode direction) for the same inner
/// type.
#[derive(Debug, Clone)]
pub struct CodecErrorForDisplay(pub CodecError);
impl std::fmt::Display for CodecErrorForDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerErrorForDisplay(pub HandlerError);
impl std::fmt::Display for HandlerErrorForDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl XpcError {
    pub fn encoding(err: CodecError) -> Self {
        XpcError::Encoding(CodecErrorForDisplay(err))
    }

    pub fn decoding(err: CodecError) -> Self {
        XpcError::Decoding(CodecErrorForDisplay(err))
    }

    pub fn handler(err: HandlerError) -> Self {
        XpcError::Handler(HandlerErrorForDisplay(err))
    }
}

pub type Result<T, E = XpcError> = std::result::Result<T, E>;

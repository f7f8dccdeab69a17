//! # Route Catalog
//!
//! A route is identified solely by its path; the message/reply/sequential-
//! reply/error type annotations that [`RouteDescriptor`]'s builder pipeline
//! accumulates are advisory and exist only to let the compiler reject
//! mismatched handler registrations and calls at the type level.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{decode_from_value, CodingContext, Decodable, Decoder, Encodable, Encoder, KeyedDecoder as _, KeyedEncoder as _};
use crate::error::{CodecError, ReconstructedError};
use crate::wire::Value;

/// A declared error type's reconstruction attempt: given the `underlying`
/// value off a handler error, decodes it as the type `throws_type::<E>()`
/// was called with, succeeding only if it actually decodes as `E`.
pub type ErrorDecoder = Arc<dyn Fn(&Value) -> Option<Arc<dyn ReconstructedError>> + Send + Sync>;

/// Path-only route identity. Two routes are equal iff their path sequences
/// are equal; this is what the registry hashes and keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    path: Vec<String>,
}

impl Route {
    fn new(path: Vec<String>) -> Self {
        assert!(!path.is_empty(), "a route's path must be non-empty");
        Self { path }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

/// Which of the six route shapes a descriptor has settled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteShape {
    NoMessageNoReply,
    NoMessageOneReply,
    NoMessageSequentialReply,
    MessageNoReply,
    MessageOneReply,
    MessageSequentialReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    None,
    One,
    Sequential,
}

/// Phantom marker: no message type has been declared.
pub struct NoMessage;
/// Phantom marker: message type `M` has been declared via `with_message_type`.
pub struct WithMessage<M>(PhantomData<M>);
/// Phantom marker: no reply type has been declared.
pub struct NoReply;
/// Phantom marker: a single-reply type `T` has been declared.
pub struct OneReply<T>(PhantomData<T>);
/// Phantom marker: a sequential-reply (streaming) type `T` has been declared.
pub struct SequentialReply<T>(PhantomData<T>);

/// A typed route descriptor built by the `named() -> with_message_type() ->
/// with_reply_type() / with_sequential_reply_type() -> throws_type()`
/// pipeline.
///
/// `Msg`/`Rep` are phantom parameters that track which shape the descriptor
/// has settled into, so e.g. calling `with_reply_type` twice, or declaring
/// both a one-shot and a sequential reply, is a compile error rather than a
/// runtime one.
pub struct RouteDescriptor<Msg = NoMessage, Rep = NoReply> {
    route: Route,
    message_type_name: Option<&'static str>,
    reply_type_name: Option<&'static str>,
    sequential_reply_type_name: Option<&'static str>,
    reply_kind: ReplyKind,
    /// Declared recoverable error types. Local to the decoding process only
    /// — never transmitted, per the data model.
    error_type_names: Vec<&'static str>,
    /// One reconstruction closure per declared error type, in the same
    /// order as `error_type_names`.
    error_decoders: Vec<ErrorDecoder>,
    _msg: PhantomData<Msg>,
    _rep: PhantomData<Rep>,
}

/// Starts a route descriptor at `{no-message, no-reply}`.
pub fn named<I, S>(path: I) -> RouteDescriptor<NoMessage, NoReply>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    RouteDescriptor {
        route: Route::new(path.into_iter().map(Into::into).collect()),
        message_type_name: None,
        reply_type_name: None,
        sequential_reply_type_name: None,
        reply_kind: ReplyKind::None,
        error_type_names: Vec::new(),
        error_decoders: Vec::new(),
        _msg: PhantomData,
        _rep: PhantomData,
    }
}

impl<Rep> RouteDescriptor<NoMessage, Rep> {
    /// Declares the route's message type. Only callable once (the compiler
    /// rejects a second call because `Msg` is no longer `NoMessage`).
    pub fn with_message_type<M>(self) -> RouteDescriptor<WithMessage<M>, Rep> {
        RouteDescriptor {
            route: self.route,
            message_type_name: Some(std::any::type_name::<M>()),
            reply_type_name: self.reply_type_name,
            sequential_reply_type_name: self.sequential_reply_type_name,
            reply_kind: self.reply_kind,
            error_type_names: self.error_type_names,
            error_decoders: self.error_decoders,
            _msg: PhantomData,
            _rep: PhantomData,
        }
    }
}

impl<Msg> RouteDescriptor<Msg, NoReply> {
    /// Declares a single-reply type. Mutually exclusive with
    /// `with_sequential_reply_type` (both require `Rep = NoReply`).
    pub fn with_reply_type<T>(self) -> RouteDescriptor<Msg, OneReply<T>> {
        RouteDescriptor {
            route: self.route,
            message_type_name: self.message_type_name,
            reply_type_name: Some(std::any::type_name::<T>()),
            sequential_reply_type_name: self.sequential_reply_type_name,
            reply_kind: ReplyKind::One,
            error_type_names: self.error_type_names,
            error_decoders: self.error_decoders,
            _msg: PhantomData,
            _rep: PhantomData,
        }
    }

    /// Declares a streaming (sequential) reply type.
    pub fn with_sequential_reply_type<T>(self) -> RouteDescriptor<Msg, SequentialReply<T>> {
        RouteDescriptor {
            route: self.route,
            message_type_name: self.message_type_name,
            reply_type_name: self.reply_type_name,
            sequential_reply_type_name: Some(std::any::type_name::<T>()),
            reply_kind: ReplyKind::Sequential,
            error_type_names: self.error_type_names,
            error_decoders: self.error_decoders,
            _msg: PhantomData,
            _rep: PhantomData,
        }
    }
}

impl<Msg, Rep> RouteDescriptor<Msg, Rep> {
    /// Declares a recoverable error type the handler may throw. May be
    /// called more than once; the list is consulted during response
    /// decoding only, never transmitted. On the client side, a received
    /// handler error's `underlying` value is tried against each declared
    /// type in turn, reconstructing it when exactly one decodes.
    pub fn throws_type<E>(mut self) -> Self
    where
        E: Decodable + fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<E>();
        self.error_type_names.push(type_name);
        self.error_decoders.push(Arc::new(|value: &Value| {
            decode_from_value::<E>(value.clone(), CodingContext::new())
                .ok()
                .map(|e| Arc::new(e) as Arc<dyn ReconstructedError>)
        }));
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn has_message(&self) -> bool {
        self.message_type_name.is_some()
    }

    pub fn expects_reply(&self) -> bool {
        self.reply_kind != ReplyKind::None
    }

    pub fn error_type_names(&self) -> &[&'static str] {
        &self.error_type_names
    }

    pub fn error_decoders(&self) -> &[ErrorDecoder] {
        &self.error_decoders
    }

    pub fn shape(&self) -> RouteShape {
        match (self.has_message(), self.reply_kind) {
            (false, ReplyKind::None) => RouteShape::NoMessageNoReply,
            (false, ReplyKind::One) => RouteShape::NoMessageOneReply,
            (false, ReplyKind::Sequential) => RouteShape::NoMessageSequentialReply,
            (true, ReplyKind::None) => RouteShape::MessageNoReply,
            (true, ReplyKind::One) => RouteShape::MessageOneReply,
            (true, ReplyKind::Sequential) => RouteShape::MessageSequentialReply,
        }
    }

    /// The encodable form carried in the request envelope's `__route` key:
    /// path plus advisory type names and the expects-reply flag. Declared
    /// error types are deliberately omitted.
    pub fn to_transmitted(&self) -> TransmittedRoute {
        TransmittedRoute {
            path_components: self.route.path.clone(),
            message_type: self.message_type_name.map(str::to_owned),
            reply_type: self.reply_type_name.map(str::to_owned),
            sequential_reply_type: self.sequential_reply_type_name.map(str::to_owned),
            expects_reply: self.expects_reply(),
        }
    }
}

/// The wire form of a route descriptor, carried as the `__route` envelope
/// field. See spec §6: `pathComponents`, `messageType`, `replyType`,
/// `sequentialReplyType`, `expectsReply`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmittedRoute {
    pub path_components: Vec<String>,
    pub message_type: Option<String>,
    pub reply_type: Option<String>,
    pub sequential_reply_type: Option<String>,
    pub expects_reply: bool,
}

impl TransmittedRoute {
    pub fn route(&self) -> Route {
        Route::new(self.path_components.clone())
    }
}

impl Encodable for TransmittedRoute {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let mut keyed = encoder.begin_keyed()?;
        keyed.encode_field("pathComponents", &self.path_components)?;
        keyed.encode_field("messageType", &self.message_type)?;
        keyed.encode_field("replyType", &self.reply_type)?;
        keyed.encode_field("sequentialReplyType", &self.sequential_reply_type)?;
        keyed.encode_field("expectsReply", &self.expects_reply)?;
        Ok(())
    }
}

impl Decodable for TransmittedRoute {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let mut keyed = decoder.begin_keyed()?;
        Ok(Self {
            path_components: keyed.decode_field("pathComponents")?,
            message_type: keyed.decode_field("messageType")?,
            reply_type: keyed.decode_field("replyType")?,
            sequential_reply_type: keyed.decode_field("sequentialReplyType")?,
            expects_reply: keyed.decode_field("expectsReply")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_path_only() {
        let a = named(["config", "update"]).with_message_type::<String>().route().clone();
        let b = named(["config", "update"])
            .with_message_type::<String>()
            .with_reply_type::<String>()
            .route()
            .clone();
        assert_eq!(a, b);
    }

    #[test]
    fn shape_reflects_message_and_reply_presence() {
        let echo = named(["echo"]).with_message_type::<String>().with_reply_type::<String>();
        assert_eq!(echo.shape(), RouteShape::MessageOneReply);

        let fib = named(["fibonacci"])
            .with_message_type::<u64>()
            .with_sequential_reply_type::<u64>();
        assert_eq!(fib.shape(), RouteShape::MessageSequentialReply);

        let bare = named(["ping"]);
        assert_eq!(bare.shape(), RouteShape::NoMessageNoReply);
    }

    #[test]
    fn transmitted_form_omits_error_types() {
        let descriptor = named(["update"])
            .with_message_type::<String>()
            .with_reply_type::<String>()
            .throws_type::<String>();
        let transmitted = descriptor.to_transmitted();
        assert_eq!(transmitted.path_components, vec!["update".to_string()]);
        assert!(transmitted.expects_reply);

        let encoded = crate::codec::encode_to_value(&transmitted).unwrap();
        let decoded: TransmittedRoute =
            crate::codec::decode_from_value(encoded, crate::codec::CodingContext::new()).unwrap();
        assert_eq!(decoded, transmitted);
    }
}

//! # Server Engine
//!
//! A listener bound to one service kind (named or anonymous), a route
//! registry written only before [`Server::start`] and read-only during
//! dispatch, and a per-connection loop that evaluates the peer-trust
//! predicate on every inbound envelope before looking up its handler.
//!
//! Handler registration is a sum type over the six route shapes (see
//! [`RouteHandler`]) rather than a trait-object per handler type — each
//! `register_*` method is generic over the concrete message/reply/error
//! types and closes over them once, at registration time, producing an
//! already-erased `Arc<dyn Fn(...)>` entry. This is the dynamic-dispatch
//! shape favored over type-erasing the handler arities themselves.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{decode_from_value, encode_to_value, CodingContext, Decodable, Encodable};
use crate::endpoint::EndpointHandle;
use crate::envelope::{ErrorPayload, RequestEnvelope, ResponseEnvelope};
use crate::error::{CodecError, HandlerError, XpcError};
use crate::route::{NoMessage, NoReply, OneReply, Route, RouteDescriptor, SequentialReply, WithMessage};
use crate::transport::{Transport, TransportConnection, TransportListener, TransportWriter};
use crate::trust::Acceptor;
use crate::wire::Value;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn TransportWriter>>>;

/// A single callback invoked for every error the server observes that the
/// caller did not otherwise learn about through a decoded reply.
#[derive(Clone)]
pub struct ErrorHook(Arc<dyn Fn(XpcError) + Send + Sync>);

impl ErrorHook {
    pub fn new(f: impl Fn(XpcError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Forwards to both the typed hook and a `tracing::error!` event, so
    /// operators watching logs see failures even with no hook wired up.
    fn report(&self, err: XpcError) {
        tracing::error!(error = %err, "server error hook");
        (self.0)(err);
    }
}

impl Default for ErrorHook {
    fn default() -> Self {
        Self::new(|_| {})
    }
}

/// Where per-connection dispatch work runs. Swapping this atomically
/// re-targets all present and future dispatchers.
pub type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

fn default_spawner() -> Spawner {
    Arc::new(|fut| {
        tokio::spawn(fut);
    })
}

fn wrap_error<E>(err: E, declared: &[&'static str]) -> HandlerError
where
    E: std::error::Error + Encodable,
{
    let type_name = std::any::type_name::<E>();
    let underlying = if declared.contains(&type_name) {
        encode_to_value(&err).ok()
    } else {
        None
    };
    HandlerError {
        localized_description: err.to_string(),
        type_name: type_name.to_string(),
        underlying,
        reconstructed: None,
    }
}

/// A dispatch-level failure, distinct from a user handler's own error: it
/// means the request never reached (or never finished inside) the handler
/// body.
enum DispatchError {
    RouteMismatch(String),
    Handler(HandlerError),
    Codec(CodecError),
}

#[derive(Clone)]
enum RouteHandler {
    OneShot(Arc<dyn Fn(Option<Value>, CodingContext) -> BoxFuture<'static, Result<Option<Value>, DispatchError>> + Send + Sync>),
    Streaming(
        Arc<
            dyn Fn(Option<Value>, CodingContext, SequentialReplyProvider) -> BoxFuture<'static, Result<(), DispatchError>>
                + Send
                + Sync,
        >,
    ),
}

#[derive(Clone)]
struct RegisteredRoute {
    handler: RouteHandler,
    declared_error_types: Vec<&'static str>,
}

/// Process-wide uniqueness cache for named listeners (spec's "only one
/// server instance may exist for any given named service").
static NAMED_SERVERS: OnceLock<Mutex<HashMap<PathBuf, Acceptor>>> = OnceLock::new();

fn named_servers() -> &'static Mutex<HashMap<PathBuf, Acceptor>> {
    NAMED_SERVERS.get_or_init(|| Mutex::new(HashMap::new()))
}

enum ListenerKind {
    Named(PathBuf),
    Anonymous,
}

/// Builds a [`Server`] bound to a named or anonymous listener.
pub struct ServerBuilder {
    transport: Arc<dyn Transport>,
    kind: ListenerKind,
    acceptor: Acceptor,
}

impl ServerBuilder {
    pub fn named(transport: Arc<dyn Transport>, path: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            kind: ListenerKind::Named(path.into()),
            acceptor: Acceptor::Always,
        }
    }

    pub fn anonymous(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            kind: ListenerKind::Anonymous,
            acceptor: Acceptor::Always,
        }
    }

    pub fn with_acceptor(mut self, acceptor: Acceptor) -> Self {
        self.acceptor = acceptor;
        self
    }

    pub async fn build(self) -> Result<Server, XpcError> {
        let named = matches!(self.kind, ListenerKind::Named(_));
        if let ListenerKind::Named(path) = &self.kind {
            let mut cache = named_servers().lock().unwrap();
            match cache.get(path) {
                Some(existing) if existing != &self.acceptor => {
                    return Err(XpcError::ConflictingClientRequirements)
                }
                Some(_) => {}
                None => {
                    cache.insert(path.clone(), self.acceptor.clone());
                }
            }
        }

        let listener = match &self.kind {
            ListenerKind::Named(path) => self.transport.bind_named(path).await,
            ListenerKind::Anonymous => self.transport.bind_anonymous().await,
        }
        .map_err(|e| XpcError::Other(format!("bind failed: {e}")))?;
        let socket_path = listener.socket_path().to_path_buf();

        Ok(Server {
            inner: Arc::new(ServerInner {
                socket_path,
                named,
                acceptor: self.acceptor,
                routes: RwLock::new(HashMap::new()),
                started: AtomicBool::new(false),
                error_hook: RwLock::new(ErrorHook::default()),
                spawner: RwLock::new(default_spawner()),
                cancel: Notify::new(),
            }),
            listener: Mutex::new(Some(listener)),
        })
    }
}

struct ServerInner {
    socket_path: PathBuf,
    named: bool,
    acceptor: Acceptor,
    routes: RwLock<HashMap<Route, RegisteredRoute>>,
    started: AtomicBool,
    error_hook: RwLock<ErrorHook>,
    spawner: RwLock<Spawner>,
    cancel: Notify,
}

impl ServerInner {
    fn report_error(&self, err: XpcError) {
        self.error_hook.read().unwrap().report(err);
    }

    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        (self.spawner.read().unwrap())(fut);
    }
}

/// A listener, its route registry, and its peer-trust predicate.
pub struct Server {
    inner: Arc<ServerInner>,
    listener: Mutex<Option<Box<dyn TransportListener>>>,
}

impl Server {
    pub fn endpoint(&self) -> EndpointHandle {
        EndpointHandle::new(self.inner.socket_path.clone())
    }

    pub fn set_error_handler(&self, handler: impl Fn(XpcError) + Send + Sync + 'static) {
        *self.inner.error_hook.write().unwrap() = ErrorHook::new(handler);
    }

    pub fn set_target_queue(&self, spawner: impl Fn(BoxFuture<'static, ()>) + Send + Sync + 'static) {
        *self.inner.spawner.write().unwrap() = Arc::new(spawner);
    }

    fn insert_route(
        &self,
        route: Route,
        handler: RouteHandler,
        declared_error_types: Vec<&'static str>,
    ) -> Result<(), XpcError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(XpcError::MisconfiguredServer {
                detail: "routes must be registered before start".to_string(),
            });
        }
        let mut routes = self.inner.routes.write().unwrap();
        if routes.contains_key(&route) {
            return Err(XpcError::RouteAlreadyRegistered(route));
        }
        routes.insert(
            route,
            RegisteredRoute {
                handler,
                declared_error_types,
            },
        );
        Ok(())
    }

    pub fn register_no_message_no_reply<E, F, Fut>(
        &self,
        descriptor: RouteDescriptor<NoMessage, NoReply>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        E: std::error::Error + Encodable + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let declared_for_closure = declared.clone();
        let entry = RouteHandler::OneShot(Arc::new(move |payload, _context| {
            if payload.is_some() {
                return Box::pin(async move {
                    Err(DispatchError::RouteMismatch(
                        "route declares no message but a payload was sent".to_string(),
                    ))
                });
            }
            let fut = handler();
            let declared = declared_for_closure.clone();
            Box::pin(async move {
                match fut.await {
                    Ok(()) => Ok(None),
                    Err(e) => Err(DispatchError::Handler(wrap_error(e, &declared))),
                }
            })
        }));
        self.insert_route(route, entry, declared)
    }

    pub fn register_no_message_one_reply<R, E, F, Fut>(
        &self,
        descriptor: RouteDescriptor<NoMessage, OneReply<R>>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        R: Encodable + Send + 'static,
        E: std::error::Error + Encodable + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let declared_for_closure = declared.clone();
        let entry = RouteHandler::OneShot(Arc::new(move |payload, _context| {
            if payload.is_some() {
                return Box::pin(async move {
                    Err(DispatchError::RouteMismatch(
                        "route declares no message but a payload was sent".to_string(),
                    ))
                });
            }
            let fut = handler();
            let declared = declared_for_closure.clone();
            Box::pin(async move {
                match fut.await {
                    Ok(value) => encode_to_value(&value).map(Some).map_err(DispatchError::Codec),
                    Err(e) => Err(DispatchError::Handler(wrap_error(e, &declared))),
                }
            })
        }));
        self.insert_route(route, entry, declared)
    }

    pub fn register_no_message_sequential_reply<S, F, Fut>(
        &self,
        descriptor: RouteDescriptor<NoMessage, SequentialReply<S>>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        F: Fn(SequentialReplyProvider) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let handler = Arc::new(handler);
        let entry = RouteHandler::Streaming(Arc::new(move |payload, _context, provider| {
            let handler = handler.clone();
            if payload.is_some() {
                return Box::pin(async move {
                    Err(DispatchError::RouteMismatch(
                        "route declares no message but a payload was sent".to_string(),
                    ))
                });
            }
            Box::pin(async move {
                handler(provider).await;
                Ok(())
            })
        }));
        self.insert_route(route, entry, declared)
    }

    pub fn register_message_no_reply<M, E, F, Fut>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, NoReply>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        M: Decodable + Send + 'static,
        E: std::error::Error + Encodable + Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let declared_for_closure = declared.clone();
        let entry = RouteHandler::OneShot(Arc::new(move |payload, context| {
            let payload = match payload {
                Some(v) => v,
                None => {
                    return Box::pin(async move {
                        Err(DispatchError::RouteMismatch(
                            "route declares a message but none was sent".to_string(),
                        ))
                    })
                }
            };
            let message = match decode_from_value::<M>(payload, context) {
                Ok(m) => m,
                Err(e) => return Box::pin(async move { Err(DispatchError::Codec(e)) }),
            };
            let fut = handler(message);
            let declared = declared_for_closure.clone();
            Box::pin(async move {
                match fut.await {
                    Ok(()) => Ok(None),
                    Err(e) => Err(DispatchError::Handler(wrap_error(e, &declared))),
                }
            })
        }));
        self.insert_route(route, entry, declared)
    }

    pub fn register_message_one_reply<M, R, E, F, Fut>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, OneReply<R>>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        M: Decodable + Send + 'static,
        R: Encodable + Send + 'static,
        E: std::error::Error + Encodable + Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let declared_for_closure = declared.clone();
        let entry = RouteHandler::OneShot(Arc::new(move |payload, context| {
            let payload = match payload {
                Some(v) => v,
                None => {
                    return Box::pin(async move {
                        Err(DispatchError::RouteMismatch(
                            "route declares a message but none was sent".to_string(),
                        ))
                    })
                }
            };
            let message = match decode_from_value::<M>(payload, context) {
                Ok(m) => m,
                Err(e) => return Box::pin(async move { Err(DispatchError::Codec(e)) }),
            };
            let fut = handler(message);
            let declared = declared_for_closure.clone();
            Box::pin(async move {
                match fut.await {
                    Ok(value) => encode_to_value(&value).map(Some).map_err(DispatchError::Codec),
                    Err(e) => Err(DispatchError::Handler(wrap_error(e, &declared))),
                }
            })
        }));
        self.insert_route(route, entry, declared)
    }

    pub fn register_message_sequential_reply<M, S, F, Fut>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, SequentialReply<S>>,
        handler: F,
    ) -> Result<(), XpcError>
    where
        M: Decodable + Send + 'static,
        F: Fn(M, SequentialReplyProvider) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let route = descriptor.route().clone();
        let declared = descriptor.error_type_names().to_vec();
        let handler = Arc::new(handler);
        let entry = RouteHandler::Streaming(Arc::new(move |payload, context, provider| {
            let handler = handler.clone();
            let payload = match payload {
                Some(v) => v,
                None => {
                    return Box::pin(async move {
                        Err(DispatchError::RouteMismatch(
                            "route declares a message but none was sent".to_string(),
                        ))
                    })
                }
            };
            let message = match decode_from_value::<M>(payload, context) {
                Ok(m) => m,
                Err(e) => return Box::pin(async move { Err(DispatchError::Codec(e)) }),
            };
            Box::pin(async move {
                handler(message, provider).await;
                Ok(())
            })
        }));
        self.insert_route(route, entry, declared)
    }

    /// Starts dispatching without blocking the caller.
    pub fn start(&self) -> Result<(), XpcError> {
        let listener = self.listener.lock().unwrap().take().ok_or_else(|| {
            XpcError::MisconfiguredServer {
                detail: "server already started".to_string(),
            }
        })?;
        self.inner.started.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        tokio::spawn(accept_loop(inner, listener));
        Ok(())
    }

    /// Starts dispatching and blocks the caller until [`Server::cancel`].
    pub async fn start_and_block(&self) -> Result<(), XpcError> {
        let listener = self.listener.lock().unwrap().take().ok_or_else(|| {
            XpcError::MisconfiguredServer {
                detail: "server already started".to_string(),
            }
        })?;
        self.inner.started.store(true, Ordering::SeqCst);
        accept_loop(self.inner.clone(), listener).await;
        Ok(())
    }

    pub fn cancel(&self) {
        self.inner.cancel.notify_waiters();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.inner.named {
            named_servers().lock().unwrap().remove(&self.inner.socket_path);
        }
    }
}

async fn accept_loop(inner: Arc<ServerInner>, mut listener: Box<dyn TransportListener>) {
    loop {
        tokio::select! {
            _ = inner.cancel.notified() => {
                debug!(path = %inner.socket_path.display(), "listener cancelled");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(conn) => {
                        let inner = inner.clone();
                        tokio::spawn(handle_connection(inner, conn));
                    }
                    Err(e) => {
                        inner.report_error(XpcError::Other(format!("accept failed: {e}")));
                    }
                }
            }
        }
    }
}

async fn handle_connection(inner: Arc<ServerInner>, conn: Box<dyn TransportConnection>) {
    let peer = match conn.peer_credentials() {
        Ok(p) => p,
        Err(e) => {
            inner.report_error(XpcError::Other(format!("peer credentials unavailable: {e}")));
            return;
        }
    };
    let (mut reader, writer) = conn.split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

    loop {
        let value = match reader.receive().await {
            Ok(Some(v)) => v,
            Ok(None) => {
                debug!("peer invalid, connection closed");
                break;
            }
            Err(e) => {
                inner.report_error(XpcError::Other(format!("transport error: {e}")));
                break;
            }
        };

        let envelope: RequestEnvelope = match decode_from_value(value, CodingContext::new()) {
            Ok(e) => e,
            Err(err) => {
                inner.report_error(XpcError::decoding(err));
                continue;
            }
        };

        if !inner.acceptor.accepts(&peer, &envelope.client_bookmark) {
            inner.report_error(XpcError::Insecure);
            continue;
        }

        let writer = writer.clone();
        inner.spawn(Box::pin(dispatch_request(inner.clone(), writer, envelope)));
    }
}

async fn dispatch_request(inner: Arc<ServerInner>, writer: SharedWriter, envelope: RequestEnvelope) {
    let route = envelope.route.route();
    let request_id = envelope.request_id;

    let entry = {
        let routes = inner.routes.read().unwrap();
        routes.get(&route).cloned()
    };
    let Some(entry) = entry else {
        inner.report_error(XpcError::RouteNotRegistered(route.clone()));
        send_error(&writer, request_id, "route-not-registered", format!("no handler registered for {route}"))
            .await;
        return;
    };

    let context = CodingContext::with_route(route.clone());
    let declared_error_types = entry.declared_error_types;
    match entry.handler {
        RouteHandler::OneShot(f) => match f(envelope.payload, context).await {
            Ok(Some(value)) => send_payload(&writer, request_id, value).await,
            Ok(None) => {}
            Err(err) => handle_dispatch_error(&inner, &writer, &route, request_id, err).await,
        },
        RouteHandler::Streaming(f) => {
            let provider =
                SequentialReplyProvider::new(request_id, writer.clone(), inner.clone(), declared_error_types);
            if let Err(err) = f(envelope.payload, context, provider).await {
                handle_dispatch_error(&inner, &writer, &route, request_id, err).await;
            }
        }
    }
}

async fn handle_dispatch_error(
    inner: &Arc<ServerInner>,
    writer: &SharedWriter,
    route: &Route,
    request_id: Uuid,
    err: DispatchError,
) {
    match err {
        DispatchError::RouteMismatch(detail) => {
            inner.report_error(XpcError::RouteMismatch {
                route: route.clone(),
                detail: detail.clone(),
            });
            send_error(writer, request_id, "route-mismatch", detail).await;
        }
        DispatchError::Handler(herr) => {
            inner.report_error(XpcError::handler(herr.clone()));
            send_error_payload(writer, request_id, ErrorPayload::from(&herr)).await;
        }
        DispatchError::Codec(cerr) => {
            inner.report_error(XpcError::encoding(cerr.clone()));
            send_error(writer, request_id, "encoding-error", cerr.to_string()).await;
        }
    }
}

async fn send_envelope(writer: &SharedWriter, envelope: ResponseEnvelope) {
    match encode_to_value(&envelope) {
        Ok(value) => {
            let mut w = writer.lock().await;
            if let Err(e) = w.send(&value).await {
                warn!(error = %e, "failed to send response");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode response envelope"),
    }
}

async fn send_payload(writer: &SharedWriter, request_id: Uuid, value: Value) {
    send_envelope(writer, ResponseEnvelope::payload(request_id, value)).await;
}

async fn send_error_payload(writer: &SharedWriter, request_id: Uuid, error: ErrorPayload) {
    send_envelope(writer, ResponseEnvelope::error(request_id, error)).await;
}

async fn send_error(writer: &SharedWriter, request_id: Uuid, type_name: &str, detail: String) {
    send_error_payload(
        writer,
        request_id,
        ErrorPayload {
            localized_description: detail,
            type_name: type_name.to_string(),
            underlying_error: None,
        },
    )
    .await;
}

/// Handed to a streaming handler; exposes `success`/`failure`/`finished`/
/// `respond`, each posted in the order called. Finishes the stream (sending
/// the terminal sentinel) on drop if no terminal operation already ran.
pub struct SequentialReplyProvider {
    request_id: Uuid,
    writer: SharedWriter,
    inner: Arc<ServerInner>,
    declared_error_types: Vec<&'static str>,
    finished: Arc<AtomicBool>,
}

impl SequentialReplyProvider {
    fn new(
        request_id: Uuid,
        writer: SharedWriter,
        inner: Arc<ServerInner>,
        declared_error_types: Vec<&'static str>,
    ) -> Self {
        Self {
            request_id,
            writer,
            inner,
            declared_error_types,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn success<T: Encodable>(&self, value: T) -> Result<(), XpcError> {
        if self.finished.load(Ordering::SeqCst) {
            self.inner.report_error(XpcError::SequenceFinished);
            return Err(XpcError::SequenceFinished);
        }
        match encode_to_value(&value) {
            Ok(v) => {
                send_payload(&self.writer, self.request_id, v).await;
                Ok(())
            }
            Err(e) => {
                self.finished.store(true, Ordering::SeqCst);
                self.inner.report_error(XpcError::encoding(e.clone()));
                send_error(&self.writer, self.request_id, "encoding-error", e.to_string()).await;
                Err(XpcError::encoding(e))
            }
        }
    }

    pub async fn failure<E: std::error::Error + Encodable>(&self, err: E) -> Result<(), XpcError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            self.inner.report_error(XpcError::SequenceFinished);
            return Err(XpcError::SequenceFinished);
        }
        let herr = wrap_error(err, &self.declared_error_types);
        self.inner.report_error(XpcError::handler(herr.clone()));
        send_error_payload(&self.writer, self.request_id, ErrorPayload::from(&herr)).await;
        Ok(())
    }

    pub async fn finished(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            self.inner.report_error(XpcError::SequenceFinished);
        } else {
            send_envelope(&self.writer, ResponseEnvelope::finished(self.request_id)).await;
        }
    }

    pub async fn respond<T, E>(&self, result: Result<T, E>) -> Result<(), XpcError>
    where
        T: Encodable,
        E: std::error::Error + Encodable,
    {
        match result {
            Ok(value) => self.success(value).await,
            Err(err) => self.failure(err).await,
        }
    }
}

impl Drop for SequentialReplyProvider {
    fn drop(&mut self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            let writer = self.writer.clone();
            let request_id = self.request_id;
            tokio::spawn(async move {
                send_envelope(&writer, ResponseEnvelope::finished(request_id)).await;
            });
        }
    }
}

//! # Client Engine
//!
//! Three client flavors share one dispatch core: a named-service client
//! reconnects on every call, a cached-service client keeps one connection
//! alive until the peer is reported invalid or interrupted, and an
//! endpoint-derived client connects exactly once and can never reconnect.
//! Each flavor's connection, once established, is driven by a single reader
//! task that demultiplexes replies to outstanding calls by `__request_id`.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::codec::{decode_from_value, encode_to_value, CodingContext, Decodable, Encodable};
use crate::endpoint::EndpointHandle;
use crate::envelope::{RequestEnvelope, ResponseEnvelope, ResponseOutcome};
use crate::error::{HandlerError, XpcError};
use crate::route::{ErrorDecoder, NoMessage, NoReply, OneReply, RouteDescriptor, SequentialReply, WithMessage};
use crate::route::TransmittedRoute;
use crate::transport::{Transport, TransportReader, TransportWriter};
use crate::wire::Value;

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn TransportWriter>>>;

enum Correlator {
    Single(oneshot::Sender<Result<ResponseOutcome, XpcError>>),
    Stream(mpsc::UnboundedSender<Result<ResponseOutcome, XpcError>>),
}

fn dispatch_invalidation(correlator: Correlator, err: XpcError) {
    match correlator {
        Correlator::Single(tx) => {
            let _ = tx.send(Err(err));
        }
        Correlator::Stream(tx) => {
            let _ = tx.send(Err(err));
        }
    }
}

struct ConnectionState {
    writer: SharedWriter,
    correlators: Arc<Mutex<HashMap<Uuid, Correlator>>>,
    invalidated: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn run_reader(
    mut reader: Box<dyn TransportReader>,
    correlators: Arc<Mutex<HashMap<Uuid, Correlator>>>,
    invalidated: Arc<AtomicBool>,
) {
    loop {
        match reader.receive().await {
            Ok(Some(value)) => {
                let envelope: ResponseEnvelope = match decode_from_value(value, CodingContext::new()) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                let mut guard = correlators.lock().unwrap();
                match envelope.outcome {
                    ResponseOutcome::Finished => {
                        if let Some(Correlator::Stream(tx)) = guard.remove(&envelope.request_id) {
                            let _ = tx.send(Ok(ResponseOutcome::Finished));
                        }
                    }
                    other => {
                        let is_stream = matches!(guard.get(&envelope.request_id), Some(Correlator::Stream(_)));
                        if is_stream {
                            if let Some(Correlator::Stream(tx)) = guard.get(&envelope.request_id) {
                                let _ = tx.send(Ok(other));
                            }
                        } else if let Some(Correlator::Single(tx)) = guard.remove(&envelope.request_id) {
                            let _ = tx.send(Ok(other));
                        }
                    }
                }
            }
            Ok(None) => {
                invalidated.store(true, Ordering::SeqCst);
                let mut guard = correlators.lock().unwrap();
                for (_, correlator) in guard.drain() {
                    dispatch_invalidation(correlator, XpcError::PeerInvalid);
                }
                break;
            }
            Err(_) => {
                invalidated.store(true, Ordering::SeqCst);
                let mut guard = correlators.lock().unwrap();
                for (_, correlator) in guard.drain() {
                    dispatch_invalidation(correlator, XpcError::PeerInterrupted);
                }
                break;
            }
        }
    }
}

enum ClientKind {
    /// Re-created on demand on every call; nothing is cached.
    PerCall(PathBuf),
    /// Connection cached until the peer is reported invalid or interrupted.
    Cached(PathBuf),
    /// Connected exactly once, from a materialized endpoint; never retried.
    Endpoint(EndpointHandle),
}

/// Builds a [`Client`] of one of the three flavors.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    kind: ClientKind,
    bookmark: Vec<u8>,
}

impl ClientBuilder {
    pub fn named_per_call(transport: Arc<dyn Transport>, path: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            kind: ClientKind::PerCall(path.into()),
            bookmark: Vec::new(),
        }
    }

    pub fn named_cached(transport: Arc<dyn Transport>, path: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            kind: ClientKind::Cached(path.into()),
            bookmark: Vec::new(),
        }
    }

    pub fn from_endpoint(transport: Arc<dyn Transport>, endpoint: EndpointHandle) -> Self {
        Self {
            transport,
            kind: ClientKind::Endpoint(endpoint),
            bookmark: Vec::new(),
        }
    }

    /// Sets the opaque `__client_bookmark` sent with every request, consulted
    /// by the peer-trust predicate's sandbox-expansion hook.
    pub fn with_bookmark(mut self, bookmark: Vec<u8>) -> Self {
        self.bookmark = bookmark;
        self
    }

    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                kind: self.kind,
                bookmark: self.bookmark,
                cached: tokio::sync::Mutex::new(None),
            }),
        }
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    kind: ClientKind,
    bookmark: Vec<u8>,
    cached: tokio::sync::Mutex<Option<Arc<ConnectionState>>>,
}

/// A handle through which requests are sent to one server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    async fn connect_fresh(&self, path: &Path) -> Result<Arc<ConnectionState>, XpcError> {
        let conn = self
            .inner
            .transport
            .connect(path)
            .await
            .map_err(|e| XpcError::Other(format!("connect failed: {e}")))?;
        let (reader, writer) = conn.split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let correlators: Arc<Mutex<HashMap<Uuid, Correlator>>> = Arc::new(Mutex::new(HashMap::new()));
        let invalidated = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(run_reader(reader, correlators.clone(), invalidated.clone()));
        Ok(Arc::new(ConnectionState {
            writer,
            correlators,
            invalidated,
            reader_task,
        }))
    }

    async fn ensure_connection(&self) -> Result<Arc<ConnectionState>, XpcError> {
        match &self.inner.kind {
            ClientKind::PerCall(path) => self.connect_fresh(path).await,
            ClientKind::Cached(path) => {
                let mut guard = self.inner.cached.lock().await;
                if let Some(state) = guard.as_ref() {
                    if !state.invalidated.load(Ordering::SeqCst) {
                        return Ok(state.clone());
                    }
                }
                let state = self.connect_fresh(path).await?;
                *guard = Some(state.clone());
                Ok(state)
            }
            ClientKind::Endpoint(endpoint) => {
                let mut guard = self.inner.cached.lock().await;
                if let Some(state) = guard.as_ref() {
                    if !state.invalidated.load(Ordering::SeqCst) {
                        return Ok(state.clone());
                    }
                    return Err(XpcError::ConnectionCannotBeReestablished);
                }
                let state = self.connect_fresh(endpoint.socket_path()).await?;
                *guard = Some(state.clone());
                Ok(state)
            }
        }
    }

    async fn write_request(&self, connection: &ConnectionState, envelope: &RequestEnvelope) -> Result<(), XpcError> {
        let value = encode_to_value(envelope).map_err(XpcError::encoding)?;
        let mut w = connection.writer.lock().await;
        w.send(&value)
            .await
            .map_err(|e| XpcError::Other(format!("transport error: {e}")))
    }

    fn build_envelope(&self, route: TransmittedRoute, payload: Option<Value>) -> RequestEnvelope {
        RequestEnvelope {
            route,
            request_id: Uuid::new_v4(),
            payload,
            client_bookmark: self.inner.bookmark.clone(),
        }
    }

    async fn send_fire_and_forget(&self, route: TransmittedRoute, payload: Option<Value>) -> Result<(), XpcError> {
        let envelope = self.build_envelope(route, payload);
        let connection = self.ensure_connection().await?;
        self.write_request(&connection, &envelope).await
    }

    async fn send_one_shot(&self, route: TransmittedRoute, payload: Option<Value>) -> Result<ResponseOutcome, XpcError> {
        let envelope = self.build_envelope(route, payload);
        let connection = self.ensure_connection().await?;
        let (tx, rx) = oneshot::channel();
        connection
            .correlators
            .lock()
            .unwrap()
            .insert(envelope.request_id, Correlator::Single(tx));
        if let Err(e) = self.write_request(&connection, &envelope).await {
            connection.correlators.lock().unwrap().remove(&envelope.request_id);
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(XpcError::ClientNotConnected),
        }
    }

    async fn send_streaming(
        &self,
        route: TransmittedRoute,
        payload: Option<Value>,
    ) -> Result<mpsc::UnboundedReceiver<Result<ResponseOutcome, XpcError>>, XpcError> {
        let envelope = self.build_envelope(route, payload);
        let connection = self.ensure_connection().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        connection
            .correlators
            .lock()
            .unwrap()
            .insert(envelope.request_id, Correlator::Stream(tx));
        if let Err(e) = self.write_request(&connection, &envelope).await {
            connection.correlators.lock().unwrap().remove(&envelope.request_id);
            return Err(e);
        }
        Ok(rx)
    }

    pub async fn send_no_message_no_reply(&self, descriptor: RouteDescriptor<NoMessage, NoReply>) -> Result<(), XpcError> {
        self.send_fire_and_forget(descriptor.route().to_transmitted(), None).await
    }

    pub async fn send_message_no_reply<M: Encodable>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, NoReply>,
        message: M,
    ) -> Result<(), XpcError> {
        let payload = encode_to_value(&message).map_err(XpcError::encoding)?;
        self.send_fire_and_forget(descriptor.route().to_transmitted(), Some(payload))
            .await
    }

    pub async fn send_no_message_one_reply<R: Decodable>(
        &self,
        descriptor: RouteDescriptor<NoMessage, OneReply<R>>,
    ) -> Result<R, XpcError> {
        let outcome = self.send_one_shot(descriptor.route().to_transmitted(), None).await?;
        decode_outcome(outcome, descriptor.error_decoders())
    }

    pub async fn send_message_one_reply<M: Encodable, R: Decodable>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, OneReply<R>>,
        message: M,
    ) -> Result<R, XpcError> {
        let payload = encode_to_value(&message).map_err(XpcError::encoding)?;
        let outcome = self
            .send_one_shot(descriptor.route().to_transmitted(), Some(payload))
            .await?;
        decode_outcome(outcome, descriptor.error_decoders())
    }

    pub async fn send_no_message_sequential_reply<S>(
        &self,
        descriptor: RouteDescriptor<NoMessage, SequentialReply<S>>,
    ) -> Result<ReplyStream<S>, XpcError>
    where
        S: Decodable + Send + 'static,
    {
        let error_decoders = descriptor.error_decoders().to_vec();
        let rx = self.send_streaming(descriptor.route().to_transmitted(), None).await?;
        Ok(ReplyStream {
            receiver: rx,
            error_decoders,
            _marker: PhantomData,
        })
    }

    pub async fn send_message_sequential_reply<M, S>(
        &self,
        descriptor: RouteDescriptor<WithMessage<M>, SequentialReply<S>>,
        message: M,
    ) -> Result<ReplyStream<S>, XpcError>
    where
        M: Encodable,
        S: Decodable + Send + 'static,
    {
        let error_decoders = descriptor.error_decoders().to_vec();
        let payload = encode_to_value(&message).map_err(XpcError::encoding)?;
        let rx = self
            .send_streaming(descriptor.route().to_transmitted(), Some(payload))
            .await?;
        Ok(ReplyStream {
            receiver: rx,
            error_decoders,
            _marker: PhantomData,
        })
    }
}

/// Tries `herr`'s `underlying` value against each of the route's declared
/// error types, keeping the reconstruction only if exactly one accepts it.
fn reconstruct(mut herr: HandlerError, error_decoders: &[ErrorDecoder]) -> HandlerError {
    if let Some(underlying) = herr.underlying.as_ref() {
        let mut matches = error_decoders.iter().filter_map(|decode| decode(underlying));
        if let Some(first) = matches.next() {
            if matches.next().is_none() {
                herr.reconstructed = Some(first);
            }
        }
    }
    herr
}

fn decode_outcome<R: Decodable>(outcome: ResponseOutcome, error_decoders: &[ErrorDecoder]) -> Result<R, XpcError> {
    match outcome {
        ResponseOutcome::Payload(v) => decode_from_value(v, CodingContext::new()).map_err(XpcError::decoding),
        ResponseOutcome::Error(e) => Err(XpcError::handler(reconstruct(e.into(), error_decoders))),
        ResponseOutcome::Finished => Err(XpcError::Unknown),
    }
}

/// A correlator-fed stream of sequential-reply values, terminated by the
/// server's finished sentinel, an error envelope, or transport invalidation.
pub struct ReplyStream<S> {
    receiver: mpsc::UnboundedReceiver<Result<ResponseOutcome, XpcError>>,
    error_decoders: Vec<ErrorDecoder>,
    _marker: PhantomData<S>,
}

impl<S: Decodable> ReplyStream<S> {
    pub async fn next(&mut self) -> Option<Result<S, XpcError>> {
        match self.receiver.recv().await {
            None => None,
            Some(Err(e)) => Some(Err(e)),
            Some(Ok(ResponseOutcome::Finished)) => None,
            Some(Ok(ResponseOutcome::Error(e))) => {
                Some(Err(XpcError::handler(reconstruct(e.into(), &self.error_decoders))))
            }
            Some(Ok(ResponseOutcome::Payload(value))) => {
                Some(decode_from_value(value, CodingContext::new()).map_err(XpcError::decoding))
            }
        }
    }
}

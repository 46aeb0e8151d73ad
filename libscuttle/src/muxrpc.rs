//! MuxRPC
//!
//! Remote calls multiplexed over one packet stream. A call opens with a JSON
//! request `{"name": [..], "args": [..], "type": ..}` on a fresh positive
//! request number, and every packet answering it carries the negated number.
//! `sync` and `async` calls get a single response; `source` calls get a
//! stream of responses closed by an end packet whose body is `true`. For
//! `sink` and `duplex` calls the caller also streams packets to the handler
//! on the positive number. A failure travels as
//! `{"name": "Error", "message": .., "stack": ..}` with the end flag set.
//!
//! [`MuxRpc`] holds the handlers this side answers. [`MuxRpc::connect`]
//! spawns a reader task that routes responses to waiting callers and
//! dispatches requests to handlers, and a writer task that owns the sending
//! half of the stream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::RpcError;
use crate::identity::FeedId;
use crate::packet::{response_number, BodyType, Packet, PacketReader, PacketStream, PacketWriter};

/// How a method is called and answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcType {
    Sync,
    #[default]
    Async,
    Source,
    Sink,
    Duplex,
}

impl RpcType {
    /// Whether packets of this call carry the stream flag
    pub fn is_stream(self) -> bool {
        matches!(self, RpcType::Source | RpcType::Sink | RpcType::Duplex)
    }

    /// Whether the caller sends more than the opening request
    fn caller_streams(self) -> bool {
        matches!(self, RpcType::Sink | RpcType::Duplex)
    }
}

/// Body of an error response
pub fn error_body(message: &str) -> JsonValue {
    json!({"name": "Error", "message": message, "stack": ""})
}

/// The error carried by `packet`, if its body is an error object
pub fn remote_error(packet: &Packet) -> Option<RpcError> {
    if packet.body_type != BodyType::Json {
        return None;
    }
    let body = packet.body_json().ok()?;
    if body.get("name").and_then(JsonValue::as_str) != Some("Error") {
        return None;
    }
    let message = body
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    Some(RpcError::Remote(message.to_string()))
}

#[derive(Debug, Deserialize)]
struct RequestBody {
    name: Vec<String>,
    #[serde(default)]
    args: Vec<JsonValue>,
    #[serde(rename = "type", default)]
    kind: RpcType,
}

/// An incoming call as a handler sees it
#[derive(Debug)]
pub struct RpcRequest {
    pub request: i32,
    pub name: Vec<String>,
    pub args: Vec<JsonValue>,
    pub kind: RpcType,
    inbound: Option<mpsc::UnboundedReceiver<Packet>>,
}

impl RpcRequest {
    /// Dotted method name, e.g. `blobs.get`
    pub fn method(&self) -> String {
        self.name.join(".")
    }

    /// Next packet the caller streams in, `None` after its end packet
    ///
    /// Always `None` for calls that are not `sink` or `duplex`.
    pub async fn next_inbound(&mut self) -> Option<Packet> {
        match self.inbound.as_mut() {
            Some(inbound) => inbound.recv().await,
            None => None,
        }
    }
}

/// A method this side answers
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Answer `request` through `responder`
    ///
    /// An error is sent to the caller unless the answer was already ended.
    /// Streams that are left open are ended when this returns.
    async fn handle(&self, request: RpcRequest, responder: &mut Responder) -> Result<(), RpcError>;
}

enum Outgoing {
    Packet(Packet),
    Close,
}

type Outbox = mpsc::UnboundedSender<Outgoing>;

fn post(outbox: &Outbox, packet: Packet) -> Result<(), RpcError> {
    outbox
        .send(Outgoing::Packet(packet))
        .map_err(|_| RpcError::Closed)
}

/// Sends the answer to one incoming call
pub struct Responder {
    request: i32,
    kind: RpcType,
    outbox: Outbox,
    ended: bool,
}

impl Responder {
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn answer(&mut self, packet: Packet, end: bool) -> Result<(), RpcError> {
        if self.ended {
            return Err(RpcError::Closed);
        }
        post(
            &self.outbox,
            packet.with_stream(self.kind.is_stream()).with_end_or_error(end),
        )?;
        self.ended = end || !self.kind.is_stream();
        Ok(())
    }

    /// The single answer to a `sync` or `async` call
    pub fn respond<T: Serialize>(&mut self, value: &T) -> Result<(), RpcError> {
        self.answer(Packet::json(self.request, value)?, false)
    }

    /// One item of a streamed answer
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<(), RpcError> {
        self.answer(Packet::json(self.request, value)?, false)
    }

    /// Close a streamed answer
    pub fn end(&mut self) -> Result<(), RpcError> {
        self.answer(Packet::json(self.request, &true)?, true)
    }

    /// Fail the call with `message`
    pub fn error(&mut self, message: &str) -> Result<(), RpcError> {
        self.answer(Packet::json(self.request, &error_body(message))?, true)
    }
}

enum ResponseSink {
    Once(oneshot::Sender<Result<Packet, RpcError>>),
    Stream(mpsc::UnboundedSender<Result<Packet, RpcError>>),
}

impl ResponseSink {
    fn fail(self, error: RpcError) {
        let delivered = match self {
            ResponseSink::Once(tx) => tx.send(Err(error)).is_ok(),
            ResponseSink::Stream(tx) => tx.send(Err(error)).is_ok(),
        };
        if !delivered {
            tracing::debug!("Caller already gone");
        }
    }
}

/// Request numbering and everything still waiting on the peer
struct Calls {
    next_request: i32,
    /// our request number -> caller waiting for the answer
    pending: HashMap<i32, ResponseSink>,
    /// peer's request number -> handler reading what the peer streams in
    inbound: HashMap<i32, mpsc::UnboundedSender<Packet>>,
    closed: bool,
}

impl Calls {
    fn new() -> Self {
        Self {
            next_request: 1,
            pending: HashMap::new(),
            inbound: HashMap::new(),
            closed: false,
        }
    }
}

/// Stream of answers to a `source` or `duplex` call
pub struct Source {
    rx: mpsc::UnboundedReceiver<Result<Packet, RpcError>>,
}

impl Source {
    /// Next answer, `None` once the peer has ended the stream
    pub async fn next(&mut self) -> Option<Result<Packet, RpcError>> {
        self.rx.recv().await
    }

    pub async fn next_json(&mut self) -> Result<Option<JsonValue>, RpcError> {
        match self.next().await {
            Some(packet) => Ok(Some(packet?.body_json()?)),
            None => Ok(None),
        }
    }

    /// Every JSON answer up to the end of the stream
    pub async fn collect_json(mut self) -> Result<Vec<JsonValue>, RpcError> {
        let mut out = Vec::new();
        while let Some(value) = self.next_json().await? {
            out.push(value);
        }
        Ok(out)
    }
}

/// Caller's side of a `sink` or `duplex` call
pub struct Sink {
    request: i32,
    outbox: Outbox,
    ended: bool,
}

impl Sink {
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<(), RpcError> {
        if self.ended {
            return Err(RpcError::Closed);
        }
        post(&self.outbox, Packet::json(self.request, value)?.with_stream(true))
    }

    /// Tell the handler nothing more is coming
    pub fn end(&mut self) -> Result<(), RpcError> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        post(
            &self.outbox,
            Packet::json(self.request, &true)?
                .with_stream(true)
                .with_end_or_error(true),
        )
    }
}

/// Handle for making calls on a connection; cheap to clone
#[derive(Clone)]
pub struct RpcSender {
    outbox: Outbox,
    calls: Arc<Mutex<Calls>>,
}

impl RpcSender {
    /// Number the request, register where its answer goes, and send it
    async fn open(
        &self,
        name: &str,
        args: Vec<JsonValue>,
        kind: RpcType,
        sink: Option<ResponseSink>,
    ) -> Result<i32, RpcError> {
        let body = json!({
            "name": name.split('.').collect::<Vec<_>>(),
            "args": args,
            "type": kind,
        });

        let mut calls = self.calls.lock().await;
        if calls.closed {
            return Err(RpcError::Closed);
        }
        let request = calls.next_request;
        let packet = Packet::json(request, &body)?.with_stream(kind.is_stream());
        post(&self.outbox, packet)?;
        calls.next_request = calls.next_request.checked_add(1).unwrap_or(1);
        if let Some(sink) = sink {
            calls.pending.insert(request, sink);
        }
        tracing::debug!("RPC call [{}] {} ({:?})", request, name, kind);
        Ok(request)
    }

    /// Call a `sync` or `async` method and wait for its answer
    pub async fn request(
        &self,
        name: &str,
        args: Vec<JsonValue>,
        kind: RpcType,
    ) -> Result<Packet, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.open(name, args, kind, Some(ResponseSink::Once(tx)))
            .await?;
        rx.await.map_err(|_| RpcError::Closed)?
    }

    /// Call a `source` method
    pub async fn source(&self, name: &str, args: Vec<JsonValue>) -> Result<Source, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.open(name, args, RpcType::Source, Some(ResponseSink::Stream(tx)))
            .await?;
        Ok(Source { rx })
    }

    /// Call a `sink` method
    pub async fn sink(&self, name: &str, args: Vec<JsonValue>) -> Result<Sink, RpcError> {
        let request = self.open(name, args, RpcType::Sink, None).await?;
        Ok(Sink {
            request,
            outbox: self.outbox.clone(),
            ended: false,
        })
    }

    /// Call a `duplex` method
    pub async fn duplex(
        &self,
        name: &str,
        args: Vec<JsonValue>,
    ) -> Result<(Source, Sink), RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = self
            .open(name, args, RpcType::Duplex, Some(ResponseSink::Stream(tx)))
            .await?;
        let sink = Sink {
            request,
            outbox: self.outbox.clone(),
            ended: false,
        };
        Ok((Source { rx }, sink))
    }
}

/// Registered method handlers
#[derive(Clone, Default)]
pub struct MuxRpc {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl MuxRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to the dotted method `name` with `handler`
    pub fn define<H: RpcHandler>(&mut self, name: &str, handler: H) -> &mut Self {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Start serving and calling over `stream`
    pub fn connect<S>(self, stream: PacketStream<S>) -> RpcConnection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = *stream.peer();
        let (reader, writer) = stream.split();
        let (outbox, outgoing) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Calls::new()));

        let dispatcher = Dispatcher {
            handlers: Arc::new(self.handlers),
            calls: calls.clone(),
            outbox: outbox.clone(),
        };
        let reader = tokio::spawn(dispatcher.run(reader));
        let writer = tokio::spawn(write_loop(writer, outgoing));

        tracing::debug!("MuxRPC connected to {}", peer);
        RpcConnection {
            sender: RpcSender { outbox, calls },
            reader,
            writer,
            peer,
        }
    }
}

async fn write_loop<W>(
    mut writer: PacketWriter<W>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(next) = outgoing.recv().await {
        match next {
            Outgoing::Packet(packet) => writer.send(&packet).await?,
            Outgoing::Close => break,
        }
    }
    writer.close().await?;
    Ok(())
}

/// Reader side of a connection
struct Dispatcher {
    handlers: Arc<HashMap<String, Arc<dyn RpcHandler>>>,
    calls: Arc<Mutex<Calls>>,
    outbox: Outbox,
}

impl Dispatcher {
    async fn run<R>(self, mut reader: PacketReader<R>) -> Result<(), RpcError>
    where
        R: AsyncRead + Unpin,
    {
        let result = loop {
            match reader.recv().await {
                Ok(Some(packet)) if packet.is_response() => self.route_response(packet).await,
                Ok(Some(packet)) => self.route_request(packet).await,
                Ok(None) => break Ok(()),
                Err(e) => {
                    tracing::warn!("MuxRPC read failed: {}", e);
                    break Err(RpcError::Packet(e));
                }
            }
        };

        let mut calls = self.calls.lock().await;
        calls.closed = true;
        calls.inbound.clear();
        for (_, sink) in calls.pending.drain() {
            sink.fail(RpcError::Closed);
        }
        result
    }

    async fn route_response(&self, packet: Packet) {
        let Some(request) = packet.request.checked_neg() else {
            tracing::debug!("Dropping response with request number {}", packet.request);
            return;
        };

        let mut calls = self.calls.lock().await;
        let Some(sink) = calls.pending.remove(&request) else {
            tracing::debug!("Dropping response to unknown request {}", request);
            return;
        };

        let end = packet.end_or_error;
        let item = match remote_error(&packet) {
            Some(e) => Err(e),
            None => Ok(packet),
        };
        match sink {
            ResponseSink::Once(tx) => {
                if tx.send(item).is_err() {
                    tracing::debug!("Caller of request {} went away", request);
                }
            }
            ResponseSink::Stream(tx) => match item {
                // A plain end packet just closes the stream
                Ok(_) if end => {}
                Err(e) => ResponseSink::Stream(tx).fail(e),
                Ok(packet) => {
                    if tx.send(Ok(packet)).is_ok() {
                        calls.pending.insert(request, ResponseSink::Stream(tx));
                    }
                }
            },
        }
    }

    async fn route_request(&self, packet: Packet) {
        let request = packet.request;
        {
            let mut calls = self.calls.lock().await;
            if let Some(inbound) = calls.inbound.remove(&request) {
                if !packet.end_or_error && inbound.send(packet).is_ok() {
                    calls.inbound.insert(request, inbound);
                }
                return;
            }
        }

        if packet.end_or_error {
            tracing::debug!("Ignoring end of unknown stream {}", request);
            return;
        }
        let stream = packet.stream;
        if let Err(e) = self.dispatch(packet).await {
            tracing::warn!("Rejected request {}: {}", request, e);
            if let Err(e) = self.reject(request, stream, &e) {
                tracing::debug!("Could not report error for request {}: {}", request, e);
            }
        }
    }

    fn reject(&self, request: i32, stream: bool, error: &RpcError) -> Result<(), RpcError> {
        let reply = Packet::json(response_number(request)?, &error_body(&error.to_string()))?;
        post(&self.outbox, reply.with_stream(stream).with_end_or_error(true))
    }

    /// Start the handler for a new call
    async fn dispatch(&self, packet: Packet) -> Result<(), RpcError> {
        let body: RequestBody = if packet.body_type == BodyType::Json {
            serde_json::from_slice(&packet.body)
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?
        } else {
            return Err(RpcError::InvalidRequest(format!(
                "expected a JSON body, got {:?}",
                packet.body_type
            )));
        };
        let method = body.name.join(".");
        let handler = self
            .handlers
            .get(&method)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotFound(method.clone()))?;
        let number = response_number(packet.request)?;
        let kind = body.kind;

        let inbound = if kind.caller_streams() {
            let (tx, rx) = mpsc::unbounded_channel();
            self.calls.lock().await.inbound.insert(packet.request, tx);
            Some(rx)
        } else {
            None
        };

        tracing::debug!("RPC request [{}] {} ({:?})", packet.request, method, kind);
        let request = RpcRequest {
            request: packet.request,
            name: body.name,
            args: body.args,
            kind,
            inbound,
        };
        let mut responder = Responder {
            request: number,
            kind,
            outbox: self.outbox.clone(),
            ended: false,
        };

        tokio::spawn(async move {
            let outcome = match handler.handle(request, &mut responder).await {
                Err(e) if !responder.is_ended() => {
                    tracing::warn!("Handler for {} failed: {}", method, e);
                    let message = match e {
                        RpcError::Remote(message) => message,
                        other => other.to_string(),
                    };
                    responder.error(&message)
                }
                Ok(()) if kind.is_stream() && !responder.is_ended() => responder.end(),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::debug!("Could not finish answer to {}: {}", method, e);
            }
        });
        Ok(())
    }
}

/// A live MuxRPC session with one peer
pub struct RpcConnection {
    sender: RpcSender,
    reader: JoinHandle<Result<(), RpcError>>,
    writer: JoinHandle<Result<(), RpcError>>,
    peer: FeedId,
}

impl RpcConnection {
    pub fn peer(&self) -> &FeedId {
        &self.peer
    }

    pub fn sender(&self) -> RpcSender {
        self.sender.clone()
    }

    pub async fn request(
        &self,
        name: &str,
        args: Vec<JsonValue>,
        kind: RpcType,
    ) -> Result<Packet, RpcError> {
        self.sender.request(name, args, kind).await
    }

    pub async fn source(&self, name: &str, args: Vec<JsonValue>) -> Result<Source, RpcError> {
        self.sender.source(name, args).await
    }

    pub async fn sink(&self, name: &str, args: Vec<JsonValue>) -> Result<Sink, RpcError> {
        self.sender.sink(name, args).await
    }

    pub async fn duplex(
        &self,
        name: &str,
        args: Vec<JsonValue>,
    ) -> Result<(Source, Sink), RpcError> {
        self.sender.duplex(name, args).await
    }

    /// Say goodbye, then wait for the peer's goodbye
    pub async fn close(self) -> Result<(), RpcError> {
        if self.sender.outbox.send(Outgoing::Close).is_err() {
            tracing::debug!("MuxRPC writer already stopped");
        }
        let written = self.writer.await.map_err(|_| RpcError::Closed)?;
        let read = self.reader.await.map_err(|_| RpcError::Closed)?;
        written?;
        read
    }
}

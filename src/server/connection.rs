//! Per-connection actor.
//!
//! Each accepted TCP connection runs one task owning the socket, the cipher
//! state, the frame assembler, the handler registry, and the response-waiter
//! table. Everything else talks to the connection through a cloneable
//! [`ConnectionHandle`] backed by a command channel, which keeps all session
//! state confined to a single scheduling domain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::{HdsStatus, Protocol, SessionError, Topic};
use crate::crypto::FrameCrypto;
use crate::opack::Value;
use crate::session::{ConnectionState, Dispatch, HandlerRegistry, Message, ProtocolHandler};
use crate::transport::{FrameAssembler, SealedFrame, encode_header};

use super::server::Shared;

/// Outcome of an outgoing request.
pub type ResponseOutcome = Result<(HdsStatus, Value), SessionError>;

/// Commands accepted by the connection task.
pub(crate) enum Command {
    SendEvent {
        protocol: Protocol,
        topic: Topic,
        body: Value,
    },
    SendRequest {
        protocol: Protocol,
        topic: Topic,
        body: Value,
        reply: oneshot::Sender<ResponseOutcome>,
    },
    SendResponse {
        protocol: Protocol,
        topic: Topic,
        id: u64,
        status: HdsStatus,
        body: Value,
    },
    AddProtocolHandler {
        protocol: Protocol,
        handler: ProtocolHandler,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    RemoveProtocolHandler {
        protocol: Protocol,
    },
    AddCloseHandler {
        handler: Box<dyn FnOnce() + Send>,
    },
    RequestTimedOut {
        id: u64,
    },
    Close,
}

/// A cloneable handle onto a live connection.
///
/// All methods enqueue work on the connection task; they never block on the
/// network themselves.
#[derive(Clone)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Peer address of the underlying socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send an event. Silently dropped unless the connection is ready.
    pub fn send_event(
        &self,
        protocol: Protocol,
        topic: Topic,
        body: Value,
    ) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::SendEvent { protocol, topic, body })
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Send a request and await the correlated response.
    ///
    /// Resolves with the peer's status and body, or with
    /// [`SessionError::RequestTimeout`] after the response deadline (which
    /// also closes the connection), or [`SessionError::Cancelled`] if the
    /// connection closes first.
    pub async fn send_request(
        &self,
        protocol: Protocol,
        topic: Topic,
        body: Value,
    ) -> ResponseOutcome {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendRequest { protocol, topic, body, reply })
            .map_err(|_| SessionError::ConnectionClosed)?;
        rx.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Send a response to a previously received request.
    pub fn send_response(
        &self,
        protocol: Protocol,
        topic: Topic,
        id: u64,
        status: HdsStatus,
        body: Value,
    ) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::SendResponse { protocol, topic, id, status, body })
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Register a handler bundle for a protocol on this connection.
    pub async fn add_protocol_handler(
        &self,
        protocol: Protocol,
        handler: ProtocolHandler,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddProtocolHandler { protocol, handler, reply })
            .map_err(|_| SessionError::ConnectionClosed)?;
        rx.await.unwrap_or(Err(SessionError::ConnectionClosed))
    }

    /// Remove a protocol's handler bundle, if registered.
    pub fn remove_protocol_handler(&self, protocol: Protocol) {
        let _ = self.cmd_tx.send(Command::RemoveProtocolHandler { protocol });
    }

    /// Run `handler` once when the connection closes.
    ///
    /// If the connection is already gone the handler runs immediately.
    pub fn add_close_handler(&self, handler: impl FnOnce() + Send + 'static) {
        if let Err(e) = self
            .cmd_tx
            .send(Command::AddCloseHandler { handler: Box::new(handler) })
        {
            if let Command::AddCloseHandler { handler } = e.0 {
                handler();
            }
        }
    }

    /// Request an orderly close.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

/// Why a connection is going away, for the close log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    HelloTimeout,
    IdentificationFailed,
    CryptoFailed,
    FrameError,
    ProtocolViolation,
    ResponseTimeout,
    PeerClosed,
    Io,
    Requested,
}

struct Waiter {
    reply: oneshot::Sender<ResponseOutcome>,
    timer: JoinHandle<()>,
}

/// The connection actor state. Owned by [`Connection::run`].
pub(crate) struct Connection {
    id: u64,
    peer: SocketAddr,
    server: Arc<Shared>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    state: ConnectionState,
    crypto: Option<FrameCrypto>,
    assembler: FrameAssembler,
    registry: HandlerRegistry,
    waiters: HashMap<u64, Waiter>,
    close_handlers: Vec<Box<dyn FnOnce() + Send>>,
    handle: ConnectionHandle,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    close_reason: Option<CloseReason>,
}

impl Connection {
    /// Wrap an accepted socket and hand back the handle for the registry.
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        server: Arc<Shared>,
    ) -> (Self, ConnectionHandle) {
        let (reader, writer) = stream.into_split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle { peer, cmd_tx };
        let connection = Self {
            id,
            peer,
            server,
            reader,
            writer,
            state: ConnectionState::Unidentified,
            crypto: None,
            assembler: FrameAssembler::new(),
            registry: HandlerRegistry::new(),
            waiters: HashMap::new(),
            close_handlers: Vec::new(),
            handle: handle.clone(),
            cmd_rx,
            close_reason: None,
        };
        (connection, handle)
    }

    /// Drive the connection until it closes.
    pub(crate) async fn run(mut self) {
        info!(peer = %self.peer, "data stream connection established");

        let hello_deadline = Instant::now() + self.server.config().hello_timeout;
        let mut buf = vec![0u8; 4096];

        while !self.state.is_closing() {
            tokio::select! {
                _ = tokio::time::sleep_until(hello_deadline),
                    if self.state < ConnectionState::Ready =>
                {
                    debug!(peer = %self.peer, "timeout waiting for hello");
                    self.begin_close(CloseReason::HelloTimeout);
                }
                read = self.reader.read(&mut buf) => {
                    match read {
                        Ok(0) => self.begin_close(CloseReason::PeerClosed),
                        Ok(n) => {
                            let data = buf[..n].to_vec();
                            self.on_data(&data).await;
                        }
                        Err(e) => {
                            debug!(peer = %self.peer, error = %e, "read failed");
                            self.begin_close(CloseReason::Io);
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd).await,
                        // All handles dropped; nothing further can be sent.
                        None => break,
                    }
                }
            }
        }

        self.finalize().await;
    }

    async fn on_data(&mut self, data: &[u8]) {
        debug!(peer = %self.peer, len = data.len(), "received bytes");
        self.assembler.extend(data);

        while !self.state.is_closing() {
            let frame = match self.assembler.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "frame error");
                    self.begin_close(CloseReason::FrameError);
                    return;
                }
            };
            self.on_frame(frame).await;
        }
    }

    async fn on_frame(&mut self, frame: SealedFrame) {
        let plaintext = if self.state == ConnectionState::Unidentified {
            // First frame: find the prepared session that can open it.
            match self.server.identify_session(&frame).await {
                Some((crypto, plaintext)) => {
                    self.crypto = Some(crypto);
                    self.state.advance(ConnectionState::ExpectingHello);
                    plaintext
                }
                None => {
                    debug!(peer = %self.peer, "could not identify connection, terminating");
                    self.begin_close(CloseReason::IdentificationFailed);
                    return;
                }
            }
        } else {
            let Some(crypto) = self.crypto.as_mut() else {
                self.begin_close(CloseReason::ProtocolViolation);
                return;
            };
            match crypto.open(&frame.header, &frame.sealed) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    // Once bound, a frame that fails to open is fatal.
                    warn!(peer = %self.peer, error = %e, "failed to decrypt frame");
                    self.begin_close(CloseReason::CryptoFailed);
                    return;
                }
            }
        };

        let message = match Message::decode(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                if self.state < ConnectionState::Ready {
                    warn!(peer = %self.peer, error = %e, "undecodable message before hello");
                    self.begin_close(CloseReason::ProtocolViolation);
                } else {
                    warn!(peer = %self.peer, error = %e, "discarding undecodable message");
                }
                return;
            }
        };

        self.process_message(message).await;
    }

    async fn process_message(&mut self, message: Message) {
        debug!(peer = %self.peer, protocol = %message.protocol(), topic = %message.topic(),
            "processing message");

        if self.state == ConnectionState::ExpectingHello {
            match message {
                Message::Request {
                    protocol: Protocol::Control,
                    topic: Topic::Hello,
                    id,
                    ..
                } => {
                    debug!(peer = %self.peer, "received hello from controller");
                    self.state.advance(ConnectionState::Ready);
                    self.send_message(&Message::Response {
                        protocol: Protocol::Control,
                        topic: Topic::Hello,
                        id,
                        status: HdsStatus::Success,
                        body: Value::Dictionary(Vec::new()),
                    })
                    .await;
                }
                other => {
                    warn!(peer = %self.peer, protocol = %other.protocol(), topic = %other.topic(),
                        "expected hello, got something else");
                    self.begin_close(CloseReason::ProtocolViolation);
                }
            }
            return;
        }

        match message {
            Message::Response { id, status, body, .. } => {
                let Some(waiter) = self.waiters.remove(&id) else {
                    warn!(peer = %self.peer, id, "unexpected response id, discarding");
                    return;
                };
                waiter.timer.abort();
                let _ = waiter.reply.send(Ok((status, body)));
            }
            // A repeated hello after READY is answered again.
            Message::Request {
                protocol: Protocol::Control,
                topic: Topic::Hello,
                id,
                ..
            } => {
                self.send_message(&Message::Response {
                    protocol: Protocol::Control,
                    topic: Topic::Hello,
                    id,
                    status: HdsStatus::Success,
                    body: Value::Dictionary(Vec::new()),
                })
                .await;
            }
            Message::Event { ref protocol, ref topic, ref body } => {
                if self.registry.dispatch_event(protocol, topic, body)
                    == Dispatch::UnregisteredProtocol
                {
                    self.server.dispatch_global(&self.handle, &message);
                }
            }
            Message::Request { ref protocol, ref topic, id, ref body } => {
                if self.registry.dispatch_request(protocol, topic, id, body)
                    == Dispatch::UnregisteredProtocol
                {
                    self.server.dispatch_global(&self.handle, &message);
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SendEvent { protocol, topic, body } => {
                if self.state != ConnectionState::Ready {
                    debug!(peer = %self.peer, %protocol, %topic,
                        "dropping event, connection not ready");
                    return;
                }
                self.send_message(&Message::Event { protocol, topic, body }).await;
            }
            Command::SendRequest { protocol, topic, body, reply } => {
                if self.state < ConnectionState::ExpectingHello || self.state.is_closing() {
                    let _ = reply.send(Err(SessionError::ConnectionClosed));
                    return;
                }
                let id = self.allocate_request_id();
                let payload = match (Message::Request { protocol, topic, id, body }).encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        let _ = reply.send(Err(SessionError::Encode(e)));
                        return;
                    }
                };
                let timer = self.spawn_response_timer(id);
                self.waiters.insert(id, Waiter { reply, timer });
                self.send_payload(payload).await;
            }
            Command::SendResponse { protocol, topic, id, status, body } => {
                if self.state < ConnectionState::ExpectingHello || self.state.is_closing() {
                    debug!(peer = %self.peer, id, "dropping response, connection not bound");
                    return;
                }
                self.send_message(&Message::Response { protocol, topic, id, status, body })
                    .await;
            }
            Command::AddProtocolHandler { protocol, handler, reply } => {
                let _ = reply.send(self.registry.add(protocol, handler));
            }
            Command::RemoveProtocolHandler { protocol } => {
                self.registry.remove(&protocol);
            }
            Command::AddCloseHandler { handler } => {
                self.close_handlers.push(handler);
            }
            Command::RequestTimedOut { id } => {
                if let Some(waiter) = self.waiters.remove(&id) {
                    warn!(peer = %self.peer, id, "request timed out");
                    let _ = waiter.reply.send(Err(SessionError::RequestTimeout));
                    // A missing response means the peer is gone or broken.
                    self.begin_close(CloseReason::ResponseTimeout);
                }
            }
            Command::Close => self.begin_close(CloseReason::Requested),
        }
    }

    /// Random 32-bit id not currently awaiting a response.
    fn allocate_request_id(&self) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let id = u64::from(rng.r#gen::<u32>());
            if id != 0 && !self.waiters.contains_key(&id) {
                return id;
            }
        }
    }

    fn spawn_response_timer(&self, id: u64) -> JoinHandle<()> {
        let cmd_tx = self.handle.cmd_tx.clone();
        let timeout = self.server.config().response_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(Command::RequestTimedOut { id });
        })
    }

    async fn send_message(&mut self, message: &Message) {
        match message.encode() {
            Ok(payload) => self.send_payload(payload).await,
            Err(e) => error!(peer = %self.peer, error = %e, "failed to encode payload"),
        }
    }

    async fn send_payload(&mut self, payload: Vec<u8>) {
        let Some(crypto) = self.crypto.as_mut() else {
            debug!(peer = %self.peer, "dropping message, connection not bound");
            return;
        };

        let header = match encode_header(payload.len()) {
            Ok(header) => header,
            Err(e) => {
                error!(peer = %self.peer, error = %e, "failed to frame payload");
                return;
            }
        };
        let sealed = match crypto.seal(&header, &payload) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(peer = %self.peer, error = %e, "failed to seal frame");
                self.begin_close(CloseReason::CryptoFailed);
                return;
            }
        };

        let mut wire = Vec::with_capacity(header.len() + sealed.len());
        wire.extend_from_slice(&header);
        wire.extend_from_slice(&sealed);

        if let Err(e) = self.writer.write_all(&wire).await {
            debug!(peer = %self.peer, error = %e, "write failed");
            self.begin_close(CloseReason::Io);
        }
    }

    fn begin_close(&mut self, reason: CloseReason) {
        if self.state.is_closing() {
            return;
        }
        self.close_reason = Some(reason);
        self.state.advance(ConnectionState::Closing);
    }

    async fn finalize(&mut self) {
        info!(peer = %self.peer, reason = ?self.close_reason, "data stream connection closed");

        // Fail every pending waiter and cancel its timer.
        for (_, waiter) in self.waiters.drain() {
            waiter.timer.abort();
            let _ = waiter.reply.send(Err(SessionError::Cancelled));
        }

        for handler in self.close_handlers.drain(..) {
            handler();
        }

        let _ = self.writer.shutdown().await;
        self.state.advance(ConnectionState::Closed);
        self.server.connection_closed(self.id).await;
    }
}

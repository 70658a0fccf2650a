//! Accessory-side data stream server.
//!
//! The server owns the TCP listener, the set of prepared sessions waiting to
//! be bound, and the set of live connections. The listener is started lazily
//! by the first prepared session and torn down again when no sessions or
//! connections remain.

use std::collections::HashMap;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::{
    HELLO_TIMEOUT, KEY_SALT_SIZE, Protocol, RESPONSE_TIMEOUT, SESSION_BIND_TIMEOUT, ServerError,
    SHARED_KEY_SIZE, Topic,
};
use crate::crypto::{FrameCrypto, generate_salt};
use crate::session::{HandlerResult, Message};
use crate::transport::SealedFrame;

use super::connection::{Connection, ConnectionHandle};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to. Port 0 requests an ephemeral port.
    pub bind_addr: SocketAddr,

    /// Deadline for the controller's HELLO after connecting.
    pub hello_timeout: Duration,

    /// Deadline for a prepared session to be bound.
    pub bind_timeout: Duration,

    /// Deadline for a response to an outgoing request.
    pub response_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            hello_timeout: HELLO_TIMEOUT,
            bind_timeout: SESSION_BIND_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}

/// Builder for creating an [`HdsServer`].
#[derive(Debug, Default)]
pub struct HdsServerBuilder {
    config: ServerConfig,
}

impl HdsServerBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the HELLO deadline.
    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.config.hello_timeout = timeout;
        self
    }

    /// Set the session bind deadline.
    pub fn bind_timeout(mut self, timeout: Duration) -> Self {
        self.config.bind_timeout = timeout;
        self
    }

    /// Set the response deadline.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Build the server.
    pub fn build(self) -> HdsServer {
        HdsServer::new(self.config)
    }
}

/// What a successful `prepare_session` hands back to the setup bridge.
#[derive(Debug, Clone, Copy)]
pub struct PreparedSessionInfo {
    /// Port the listener is bound to.
    pub port: u16,
    /// Fresh accessory key salt for this session.
    pub accessory_salt: [u8; KEY_SALT_SIZE],
}

/// Identifies one registration in the global handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Catch-all handler for messages no per-connection registration claimed.
pub type GlobalHandler = Arc<dyn Fn(&ConnectionHandle, &Message) -> HandlerResult + Send + Sync>;

/// A session prepared out of band, waiting for its TCP connection.
struct PreparedSession {
    id: u64,
    crypto: FrameCrypto,
    deadline: Instant,
    timer: JoinHandle<()>,
}

struct ListenerState {
    port: u16,
    accept_task: JoinHandle<()>,
}

#[derive(Default)]
struct ServerState {
    listener: Option<ListenerState>,
    pending: Vec<PreparedSession>,
    connections: HashMap<u64, ConnectionHandle>,
    next_id: u64,
}

/// State shared between the server handle, the accept loop, and connections.
pub(crate) struct Shared {
    config: ServerConfig,
    state: tokio::sync::Mutex<ServerState>,
    global: RwLock<HashMap<(Protocol, Topic), Vec<(HandlerId, GlobalHandler)>>>,
    next_handler_id: AtomicU64,
}

/// The accessory's data stream server.
///
/// Cheap to clone; clones share one listener and session set.
#[derive(Clone)]
pub struct HdsServer {
    shared: Arc<Shared>,
}

impl HdsServer {
    /// Create a server with the given configuration. Nothing is bound yet.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: tokio::sync::Mutex::new(ServerState::default()),
                global: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a builder.
    pub fn builder() -> HdsServerBuilder {
        HdsServerBuilder::new()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Prepare for an incoming connection.
    ///
    /// Starts the listener if it is not already running, derives this
    /// session's cipher states from the shared secret and the two salts, and
    /// arms the bind deadline. Returns the listening port and the freshly
    /// generated accessory salt for the setup response.
    pub async fn prepare_session(
        &self,
        shared_key: &[u8; SHARED_KEY_SIZE],
        controller_salt: &[u8; KEY_SALT_SIZE],
    ) -> Result<PreparedSessionInfo, ServerError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        let port = match &state.listener {
            Some(listener) => listener.port,
            None => {
                let listener = TcpListener::bind(shared.config.bind_addr)
                    .await
                    .map_err(|e| ServerError::BindFailed(e.to_string()))?;
                let port = listener
                    .local_addr()
                    .map_err(|e| ServerError::BindFailed(e.to_string()))?
                    .port();
                debug!(port, "data stream server listening");
                let accept_task = tokio::spawn(accept_loop(shared.clone(), listener));
                state.listener = Some(ListenerState { port, accept_task });
                port
            }
        };

        let accessory_salt = generate_salt();
        let crypto = FrameCrypto::accessory(shared_key, controller_salt, &accessory_salt);

        let id = state.next_id;
        state.next_id += 1;
        let deadline = Instant::now() + shared.config.bind_timeout;
        let timer = tokio::spawn(expire_session(shared.clone(), id, deadline));
        state.pending.push(PreparedSession { id, crypto, deadline, timer });
        debug!(id, port, "prepared data stream session");

        Ok(PreparedSessionInfo { port, accessory_salt })
    }

    /// Port of the running listener, if any.
    pub async fn local_port(&self) -> Option<u16> {
        self.shared.state.lock().await.listener.as_ref().map(|l| l.port)
    }

    /// Number of sessions waiting to be bound.
    pub async fn pending_session_count(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.shared.state.lock().await.connections.len()
    }

    /// Register a catch-all handler for `(protocol, topic)` messages that no
    /// per-connection registration claimed.
    pub fn add_request_handler(
        &self,
        protocol: Protocol,
        topic: Topic,
        handler: GlobalHandler,
    ) -> HandlerId {
        let id = HandlerId(self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let mut global = self.shared.global.write().unwrap_or_else(|e| e.into_inner());
        global.entry((protocol, topic)).or_default().push((id, handler));
        id
    }

    /// Remove a previously registered catch-all handler.
    pub fn remove_request_handler(&self, protocol: Protocol, topic: Topic, id: HandlerId) {
        let mut global = self.shared.global.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handlers) = global.get_mut(&(protocol, topic)) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Shut down the listener, drop prepared sessions, and close every
    /// connection.
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if let Some(listener) = state.listener.take() {
            listener.accept_task.abort();
        }
        for session in state.pending.drain(..) {
            session.timer.abort();
        }
        for handle in state.connections.values() {
            handle.close();
        }
        info!("data stream server closed");
    }
}

impl Shared {
    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Find the prepared session whose read cipher opens `frame`.
    ///
    /// The pending set is taken out of the lock for the trial decryptions so
    /// the mutex is never held across an AEAD call. The matching session is
    /// consumed; the rest are put back unless their deadline passed while
    /// they were checked out.
    pub(crate) async fn identify_session(
        self: &Arc<Self>,
        frame: &SealedFrame,
    ) -> Option<(FrameCrypto, Vec<u8>)> {
        let mut pending = mem::take(&mut self.state.lock().await.pending);

        let mut matched = None;
        let mut keep = Vec::with_capacity(pending.len());
        for mut session in pending.drain(..) {
            if matched.is_none() {
                match session.crypto.open(&frame.header, &frame.sealed) {
                    Ok(plaintext) => {
                        session.timer.abort();
                        debug!(id = session.id, "bound connection to prepared session");
                        matched = Some((session.crypto, plaintext));
                        continue;
                    }
                    Err(_) => {
                        // Expected during identification: not this session.
                    }
                }
            }
            keep.push(session);
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;
        for session in keep {
            if session.deadline > now {
                state.pending.push(session);
            }
        }
        matched
    }

    /// Route an unclaimed message through the global handler table.
    pub(crate) fn dispatch_global(self: &Arc<Self>, handle: &ConnectionHandle, message: &Message) {
        let key = (message.protocol().clone(), message.topic().clone());
        let handlers: Vec<GlobalHandler> = {
            let global = self.global.read().unwrap_or_else(|e| e.into_inner());
            global
                .get(&key)
                .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            warn!(protocol = %message.protocol(), topic = %message.topic(),
                "no handler for message");
            return;
        }
        for handler in handlers {
            if let Err(e) = handler(handle, message) {
                error!(protocol = %message.protocol(), topic = %message.topic(), error = %e,
                    "message handler failed");
            }
        }
    }

    pub(crate) async fn connection_closed(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock().await;
        state.connections.remove(&id);
        check_closeable(&mut state);
    }
}

/// Drop the listener once nothing references it anymore. Best effort; the
/// next prepared session simply starts a fresh one.
fn check_closeable(state: &mut ServerState) {
    if state.pending.is_empty() && state.connections.is_empty() {
        if let Some(listener) = state.listener.take() {
            debug!(port = listener.port, "no sessions or connections left, closing listener");
            listener.accept_task.abort();
        }
    }
}

async fn expire_session(shared: Arc<Shared>, id: u64, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
    let mut state = shared.state.lock().await;
    let before = state.pending.len();
    state.pending.retain(|session| session.id != id);
    if state.pending.len() < before {
        debug!(id, "prepared session timed out before a connection was opened");
        check_closeable(&mut state);
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let mut state = shared.state.lock().await;
                let id = state.next_id;
                state.next_id += 1;
                let (connection, handle) = Connection::new(id, stream, peer, shared.clone());
                state.connections.insert(id, handle);
                drop(state);
                tokio::spawn(connection.run());
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

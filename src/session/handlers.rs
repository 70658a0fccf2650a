//! Per-connection handler registry.
//!
//! Each protocol may have at most one registered handler bundle at a time,
//! holding optional per-topic event and request callbacks. Messages whose
//! protocol has no registration fall through to the server's catch-all
//! callback. Handler failures are isolated: they are logged and the
//! connection stays up.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::core::{Protocol, SessionError, Topic};
use crate::opack::Value;

/// Outcome reported by a fallible handler.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callback for an incoming event on a registered topic.
pub type EventHandler = Box<dyn FnMut(&Value) -> HandlerResult + Send>;

/// Callback for an incoming request on a registered topic.
///
/// Receives the request id to echo in the response.
pub type RequestHandler = Box<dyn FnMut(u64, &Value) -> HandlerResult + Send>;

/// The handler bundle registered for one protocol.
#[derive(Default)]
pub struct ProtocolHandler {
    event_handlers: HashMap<Topic, EventHandler>,
    request_handlers: HashMap<Topic, RequestHandler>,
}

impl ProtocolHandler {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an event handler for a topic.
    pub fn on_event(
        mut self,
        topic: Topic,
        handler: impl FnMut(&Value) -> HandlerResult + Send + 'static,
    ) -> Self {
        self.event_handlers.insert(topic, Box::new(handler));
        self
    }

    /// Attach a request handler for a topic.
    pub fn on_request(
        mut self,
        topic: Topic,
        handler: impl FnMut(u64, &Value) -> HandlerResult + Send + 'static,
    ) -> Self {
        self.request_handlers.insert(topic, Box::new(handler));
        self
    }
}

/// How a message fared against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran (its own failure is already logged).
    Handled,
    /// The protocol has no registration; route to the catch-all.
    UnregisteredProtocol,
    /// The protocol is registered but not the topic; drop the message.
    UnhandledTopic,
}

/// Handler bundles keyed by protocol.
#[derive(Default)]
pub struct HandlerRegistry {
    protocols: HashMap<Protocol, ProtocolHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle for a protocol.
    ///
    /// Fails if the protocol already has one; unregister first.
    pub fn add(&mut self, protocol: Protocol, handler: ProtocolHandler) -> Result<(), SessionError> {
        if self.protocols.contains_key(&protocol) {
            return Err(SessionError::AlreadyRegistered(protocol));
        }
        self.protocols.insert(protocol, handler);
        Ok(())
    }

    /// Remove a protocol's bundle, returning it if present.
    pub fn remove(&mut self, protocol: &Protocol) -> Option<ProtocolHandler> {
        self.protocols.remove(protocol)
    }

    /// Route an event to its handler.
    pub fn dispatch_event(&mut self, protocol: &Protocol, topic: &Topic, body: &Value) -> Dispatch {
        let Some(bundle) = self.protocols.get_mut(protocol) else {
            return Dispatch::UnregisteredProtocol;
        };
        let Some(handler) = bundle.event_handlers.get_mut(topic) else {
            warn!(%protocol, %topic, "no event handler for topic");
            return Dispatch::UnhandledTopic;
        };
        if let Err(e) = handler(body) {
            error!(%protocol, %topic, error = %e, "event handler failed");
        }
        Dispatch::Handled
    }

    /// Route a request to its handler.
    pub fn dispatch_request(
        &mut self,
        protocol: &Protocol,
        topic: &Topic,
        id: u64,
        body: &Value,
    ) -> Dispatch {
        let Some(bundle) = self.protocols.get_mut(protocol) else {
            return Dispatch::UnregisteredProtocol;
        };
        let Some(handler) = bundle.request_handlers.get_mut(topic) else {
            warn!(%protocol, %topic, id, "no request handler for topic");
            return Dispatch::UnhandledTopic;
        };
        if let Err(e) = handler(id, body) {
            error!(%protocol, %topic, id, error = %e, "request handler failed");
        }
        Dispatch::Handled
    }
}

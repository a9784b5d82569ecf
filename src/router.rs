//! Message Router
//!
//! Maps a message tag to exactly one registered handler and dispatches
//! inbound envelopes. The dispatch table is fixed at startup by the builder;
//! there is no runtime discovery. Open/close lifecycle hooks let independent
//! subsystems (presence registry, game-connection tracking) maintain their
//! own state without the router knowing about them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::protocol::MessageEnvelope;

/// Handler for one message tag.
pub type MessageHandler =
    dyn Fn(&Arc<ConnectionHandle>, &MessageEnvelope) -> Result<(), String> + Send + Sync;

/// Subscriber to connection lifecycle events.
pub trait ConnectionListener: Send + Sync {
    fn on_open(&self, connection: &Arc<ConnectionHandle>);
    fn on_close(&self, connection: &Arc<ConnectionHandle>);
}

/// Dispatch failure. Both variants are treated as malformed input by the
/// lifecycle guard, not as router-level faults.
#[derive(Debug)]
pub enum RouteError {
    /// No handler registered for the tag.
    UnknownTag(String),
    /// The handler rejected the message.
    Handler(String),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::UnknownTag(tag) => write!(f, "unknown message type: {}", tag),
            RouteError::Handler(e) => write!(f, "handler error: {}", e),
        }
    }
}

/// Builder assembling the dispatch table before the server starts.
pub struct MessageRouterBuilder {
    handlers: HashMap<String, Box<MessageHandler>>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl MessageRouterBuilder {
    /// Registers the handler for a tag. At most one handler per tag;
    /// a duplicate registration is a startup programming error.
    pub fn register<F>(mut self, tag: &str, handler: F) -> Self
    where
        F: Fn(&Arc<ConnectionHandle>, &MessageEnvelope) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        if self
            .handlers
            .insert(tag.to_string(), Box::new(handler))
            .is_some()
        {
            panic!("duplicate handler registered for tag '{}'", tag);
        }
        self
    }

    /// Subscribes a lifecycle listener.
    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> MessageRouter {
        MessageRouter {
            handlers: self.handlers,
            listeners: self.listeners,
        }
    }
}

/// Immutable dispatch table plus lifecycle subscribers.
pub struct MessageRouter {
    handlers: HashMap<String, Box<MessageHandler>>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl MessageRouter {
    pub fn builder() -> MessageRouterBuilder {
        MessageRouterBuilder {
            handlers: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Notifies subscribers of a newly accepted connection.
    pub fn on_open(&self, connection: &Arc<ConnectionHandle>) {
        for listener in &self.listeners {
            listener.on_open(connection);
        }
    }

    /// Dispatches one envelope to its handler.
    pub fn on_message(
        &self,
        connection: &Arc<ConnectionHandle>,
        envelope: &MessageEnvelope,
    ) -> Result<(), RouteError> {
        match self.handlers.get(&envelope.message_type_id) {
            Some(handler) => handler(connection, envelope).map_err(RouteError::Handler),
            None => Err(RouteError::UnknownTag(envelope.message_type_id.clone())),
        }
    }

    /// Notifies subscribers that a connection closed.
    pub fn on_close(&self, connection: &Arc<ConnectionHandle>) {
        for listener in &self.listeners {
            listener.on_close(connection);
        }
    }

    pub fn handles(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }
}

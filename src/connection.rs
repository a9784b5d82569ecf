//! Connection Handle
//!
//! One handle per open duplex connection. The handle is the only way the
//! rest of the server talks to a connection: sends go into a bounded channel
//! drained by the connection's write task, and `close` signals the task to
//! drop the socket. Handles are shared via `Arc` and never block the caller.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::MessageEnvelope;

/// Opaque identifier for one connection, unique per server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    fn new() -> Self {
        ConnectionId(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough for log correlation.
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// An instruction for the connection's write task.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Send one encoded envelope frame.
    Frame(String),
    /// Send nothing further and close the socket. The reason is logged,
    /// not transmitted; notices to the peer are sent as frames beforehand.
    Close(String),
}

/// Handle to one open connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: IpAddr,
    tx: mpsc::Sender<ConnectionEvent>,
    open: AtomicBool,
}

const OUTBOUND_BUFFER: usize = 64;

impl ConnectionHandle {
    /// Creates a handle and the receiving end of its outbound channel.
    pub fn new(addr: IpAddr) -> (Arc<Self>, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId::new(),
            addr,
            tx,
            open: AtomicBool::new(true),
        });
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_address(&self) -> IpAddr {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queues one envelope for delivery. Returns false if the connection is
    /// closed or its outbound buffer is full (slow consumer).
    pub fn send(&self, envelope: &MessageEnvelope) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx
            .try_send(ConnectionEvent::Frame(envelope.encode()))
            .is_ok()
    }

    /// Closes the connection. Immediate and unconditional once issued; there
    /// is no graceful-shutdown negotiation with the peer. Idempotent.
    pub fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.try_send(ConnectionEvent::Close(reason.to_string()));
        }
    }
}

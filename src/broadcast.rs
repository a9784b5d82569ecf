//! Broadcaster
//!
//! Fan-out helper: sends one envelope to one or many open connections.
//! Delivery is best-effort and unordered relative to connections joining
//! mid-broadcast; a closed or saturated connection is skipped, not an error.

use std::sync::Arc;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics::LobbyMetrics;
use crate::protocol::MessageEnvelope;

pub struct Broadcaster {
    metrics: LobbyMetrics,
}

impl Broadcaster {
    pub fn new(metrics: LobbyMetrics) -> Self {
        Broadcaster { metrics }
    }

    /// Sends one envelope to one connection. Returns false if the connection
    /// was closed or could not accept the frame.
    pub fn send_to(&self, connection: &ConnectionHandle, envelope: &MessageEnvelope) -> bool {
        let sent = connection.send(envelope);
        if sent {
            self.metrics.messages_sent.inc();
        }
        sent
    }

    /// Sends one envelope to every connection in the set.
    pub fn broadcast(&self, connections: &[Arc<ConnectionHandle>], envelope: &MessageEnvelope) {
        for connection in connections {
            self.send_to(connection, envelope);
        }
    }

    /// Sends one envelope to every connection in the set except one
    /// (typically the originator).
    pub fn broadcast_except(
        &self,
        connections: &[Arc<ConnectionHandle>],
        skip: ConnectionId,
        envelope: &MessageEnvelope,
    ) {
        for connection in connections {
            if connection.id() != skip {
                self.send_to(connection, envelope);
            }
        }
    }
}

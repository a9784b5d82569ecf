//! Connection lifecycle guard.
//!
//! Sits between the transport and the router: rejects banned addresses at
//! accept time, drops traffic from throttled addresses, and answers
//! malformed or unroutable frames with a single error envelope while the
//! sender's bad-message budget lasts.

use std::sync::Arc;

use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::connection::ConnectionHandle;
use crate::metrics::LobbyMetrics;
use crate::moderation::format_ban_duration;
use crate::protocol::{self, MessageEnvelope};
use crate::router::{MessageRouter, RouteError};
use crate::storage::ModerationStore;
use crate::throttle::BadMessageThrottle;

pub struct LifecycleGuard {
    router: Arc<MessageRouter>,
    throttle: BadMessageThrottle,
    store: Arc<dyn ModerationStore>,
    broadcaster: Arc<Broadcaster>,
    metrics: LobbyMetrics,
}

impl LifecycleGuard {
    pub fn new(
        router: Arc<MessageRouter>,
        throttle: BadMessageThrottle,
        store: Arc<dyn ModerationStore>,
        broadcaster: Arc<Broadcaster>,
        metrics: LobbyMetrics,
    ) -> Self {
        LifecycleGuard {
            router,
            throttle,
            store,
            broadcaster,
            metrics,
        }
    }

    /// Admits or rejects a freshly accepted connection. A banned address is
    /// told why and closed before any message flows; the listeners never see
    /// it.
    pub fn accept_connection(&self, connection: &Arc<ConnectionHandle>) -> bool {
        let addr = connection.remote_address();
        if let Some(ban) = self.store.ban_for(addr) {
            info!("rejecting banned address {}", addr);
            let notice = protocol::create_player_banned(&format!(
                "You have been banned, {} remaining",
                format_ban_duration(ban.remaining_minutes())
            ));
            self.broadcaster.send_to(connection, &notice);
            connection.close("banned");
            self.metrics.connections_banned.inc();
            return false;
        }

        self.router.on_open(connection);
        self.metrics.connections_total.inc();
        self.metrics.connections_active.inc();
        true
    }

    /// Routes one inbound frame. Throttled senders are dropped without a
    /// reply; decode failures, unknown tags and handler failures all spend
    /// bad-message budget and are answered while it lasts.
    pub fn handle_message(&self, connection: &Arc<ConnectionHandle>, raw: &str) {
        let addr = connection.remote_address();
        if self.throttle.is_throttled(addr) {
            self.metrics.messages_throttled.inc();
            return;
        }

        let envelope = match MessageEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.bad_message(connection, &e);
                return;
            }
        };

        match self.router.on_message(connection, &envelope) {
            Ok(()) => {
                self.metrics.messages_routed.inc();
            }
            Err(RouteError::UnknownTag(_)) => {
                self.bad_message(
                    connection,
                    &format!("no handler for message type '{}'", envelope.message_type_id),
                );
            }
            Err(RouteError::Handler(e)) => {
                debug!(
                    "handler for '{}' failed: {}",
                    envelope.message_type_id, e
                );
                self.bad_message(connection, &e);
            }
        }
    }

    /// Tears a connection down through the router's close hook.
    pub fn handle_close(&self, connection: &Arc<ConnectionHandle>) {
        self.router.on_close(connection);
        self.metrics.connections_active.dec();
    }

    fn bad_message(&self, connection: &Arc<ConnectionHandle>, error: &str) {
        let addr = connection.remote_address();
        self.metrics.messages_malformed.inc();
        if self.throttle.record_bad(addr) {
            self.broadcaster
                .send_to(connection, &protocol::create_server_error(error));
        } else {
            debug!("dropping bad message from throttled address {}", addr);
        }
    }
}

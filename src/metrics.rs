//! Prometheus Metrics for the Lobby
//!
//! Provides observability metrics for monitoring the lobby messaging core.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Lobby server metrics.
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Connections rejected at entry because of an active ban.
    pub connections_banned: IntCounter,

    // Message metrics
    /// Messages successfully routed to a handler.
    pub messages_routed: IntCounter,
    /// Malformed messages (bad JSON, unknown tag, handler rejection).
    pub messages_malformed: IntCounter,
    /// Messages silently dropped from throttled senders.
    pub messages_throttled: IntCounter,
    /// Envelopes sent to connections (unicast and broadcast fan-out).
    pub messages_sent: IntCounter,

    // Moderation metrics
    /// Bans issued.
    pub bans_issued: IntCounter,
    /// Moderator-initiated disconnects.
    pub moderator_disconnects: IntCounter,
    /// Shutdown requests sent to remote hosts.
    pub shutdown_requests: IntCounter,
}

impl LobbyMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "lobby_connections_total",
            "Total WebSocket connections accepted",
        ))
        .unwrap();

        let connections_active = IntGauge::with_opts(Opts::new(
            "lobby_connections_active",
            "Current active WebSocket connections",
        ))
        .unwrap();

        let connections_banned = IntCounter::with_opts(Opts::new(
            "lobby_connections_banned_total",
            "Connections rejected because of an active ban",
        ))
        .unwrap();

        let messages_routed = IntCounter::with_opts(Opts::new(
            "lobby_messages_routed_total",
            "Messages dispatched to a registered handler",
        ))
        .unwrap();

        let messages_malformed = IntCounter::with_opts(Opts::new(
            "lobby_messages_malformed_total",
            "Malformed or rejected inbound messages",
        ))
        .unwrap();

        let messages_throttled = IntCounter::with_opts(Opts::new(
            "lobby_messages_throttled_total",
            "Messages dropped from throttled senders",
        ))
        .unwrap();

        let messages_sent = IntCounter::with_opts(Opts::new(
            "lobby_messages_sent_total",
            "Envelopes sent to connections",
        ))
        .unwrap();

        let bans_issued = IntCounter::with_opts(Opts::new(
            "lobby_bans_issued_total",
            "Bans issued by moderators",
        ))
        .unwrap();

        let moderator_disconnects = IntCounter::with_opts(Opts::new(
            "lobby_moderator_disconnects_total",
            "Moderator-initiated disconnects",
        ))
        .unwrap();

        let shutdown_requests = IntCounter::with_opts(Opts::new(
            "lobby_shutdown_requests_total",
            "Shutdown requests sent to remote hosts",
        ))
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_banned.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_routed.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_malformed.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_throttled.clone()))
            .unwrap();
        registry.register(Box::new(messages_sent.clone())).unwrap();
        registry.register(Box::new(bans_issued.clone())).unwrap();
        registry
            .register(Box::new(moderator_disconnects.clone()))
            .unwrap();
        registry
            .register(Box::new(shutdown_requests.clone()))
            .unwrap();

        LobbyMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connections_banned,
            messages_routed,
            messages_malformed,
            messages_throttled,
            messages_sent,
            bans_issued,
            moderator_disconnects,
            shutdown_requests,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for LobbyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

//! Moderation actions.
//!
//! Banning, moderator disconnects, and remote shutdown requests. Actions
//! fan out over every registered session registry so that a moderator call
//! hits chat and game-relay sessions alike, and they complete all of their
//! side effects before returning.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::chatters::Chatters;
use crate::metrics::LobbyMetrics;
use crate::protocol;
use crate::session_registry::SessionRegistry;
use crate::storage::{AuditEntry, BanRecord, ModerationStore};

/// Notified after a ban has been recorded. Runs on the caller's thread.
pub trait BanListener: Send + Sync {
    fn on_ban(&self, ban: &BanRecord);
}

/// Renders a ban duration using its largest whole unit. Unit names stay
/// plural regardless of the count.
pub fn format_ban_duration(minutes: u64) -> String {
    if minutes < 60 {
        format!("{} minutes", minutes)
    } else if minutes < 60 * 24 {
        format!("{} hours", minutes / 60)
    } else {
        format!("{} days", minutes / (60 * 24))
    }
}

pub struct Moderation {
    registries: RwLock<Vec<Arc<SessionRegistry>>>,
    ban_listeners: RwLock<Vec<Arc<dyn BanListener>>>,
    store: Arc<dyn ModerationStore>,
    chatters: Arc<Chatters>,
    broadcaster: Arc<Broadcaster>,
    metrics: LobbyMetrics,
}

impl Moderation {
    pub fn new(
        store: Arc<dyn ModerationStore>,
        chatters: Arc<Chatters>,
        broadcaster: Arc<Broadcaster>,
        metrics: LobbyMetrics,
    ) -> Self {
        Moderation {
            registries: RwLock::new(Vec::new()),
            ban_listeners: RwLock::new(Vec::new()),
            store,
            chatters,
            broadcaster,
            metrics,
        }
    }

    /// Adds a session registry to the set covered by moderation actions.
    pub fn register_registry(&self, registry: Arc<SessionRegistry>) {
        let mut registries = self.registries.write().unwrap();
        registries.push(registry);
    }

    pub fn register_ban_listener(&self, listener: Arc<dyn BanListener>) {
        let mut listeners = self.ban_listeners.write().unwrap();
        listeners.push(listener);
    }

    /// Bans an address. In order: closes every matching connection in every
    /// registered registry (with a ban notice), announces the ban in chat,
    /// persists the ban, and notifies ban listeners. All steps have run by
    /// the time this returns.
    ///
    /// A store write failure is returned to the caller, but the closed
    /// connections stay closed.
    pub fn ban_by_ip(
        &self,
        ip: IpAddr,
        username: &str,
        hashed_mac: &str,
        duration_minutes: u64,
        moderator: &str,
    ) -> Result<(), String> {
        let duration = format_ban_duration(duration_minutes);
        let notice = protocol::create_player_banned(&format!(
            "You have been banned for {}",
            duration
        ));

        let registries = self.registries.read().unwrap().clone();
        for registry in &registries {
            for connection in registry.by_address(ip) {
                self.broadcaster.send_to(&connection, &notice);
                connection.close("banned");
            }
        }

        let event = protocol::create_chat_event(&format!(
            "{} violated lobby rules and was banned for {}",
            username, duration
        ));
        self.broadcaster
            .broadcast(&self.chatters.session_registry().connections(), &event);

        let ban = BanRecord::new(username, hashed_mac, ip, duration_minutes);
        if let Err(e) = self.store.record_ban(ban.clone()) {
            warn!("ban of {} issued but not persisted: {}", ip, e);
            return Err(e);
        }
        if let Err(e) = self.store.record_audit(AuditEntry::new(
            moderator,
            "ban",
            &format!("{} ({})", username, ip),
        )) {
            warn!("audit write failed: {}", e);
        }

        info!("{} banned {} ({}) for {}", moderator, username, ip, duration);
        self.metrics.bans_issued.inc();

        let listeners = self.ban_listeners.read().unwrap().clone();
        for listener in &listeners {
            listener.on_ban(&ban);
        }
        Ok(())
    }

    /// Asks every connection from an address to shut down. Returns the
    /// number of connections reached. Nothing is closed server-side; the
    /// remote process is expected to exit on its own.
    pub fn shutdown_by_ip(&self, ip: IpAddr, moderator: &str) -> usize {
        let request = protocol::create_shutdown_request();
        let mut reached = 0;

        let registries = self.registries.read().unwrap().clone();
        for registry in &registries {
            for connection in registry.by_address(ip) {
                self.broadcaster.send_to(&connection, &request);
                reached += 1;
            }
        }

        if let Err(e) =
            self.store
                .record_audit(AuditEntry::new(moderator, "shutdown", &ip.to_string()))
        {
            warn!("audit write failed: {}", e);
        }
        info!("{} requested shutdown of {} ({} connections)", moderator, ip, reached);
        self.metrics.shutdown_requests.inc();
        reached
    }

    /// Disconnects a chat identity on a moderator's behalf. Returns false
    /// when the identity is not connected.
    pub fn disconnect_by_moderator(&self, moderator: &str, identity: &str) -> bool {
        let disconnected = self
            .chatters
            .disconnect_by_identity(identity, "You have been disconnected by a moderator");
        if !disconnected {
            return false;
        }

        let event =
            protocol::create_chat_event(&format!("{} was disconnected by a moderator", identity));
        self.broadcaster
            .broadcast(&self.chatters.session_registry().connections(), &event);

        if let Err(e) = self
            .store
            .record_audit(AuditEntry::new(moderator, "disconnect", identity))
        {
            warn!("audit write failed: {}", e);
        }
        info!("{} disconnected {}", moderator, identity);
        self.metrics.moderator_disconnects.inc();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionEvent, ConnectionHandle};
    use crate::storage::MemoryModerationStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Fixture {
        moderation: Moderation,
        chatters: Arc<Chatters>,
        store: Arc<MemoryModerationStore>,
        game_sessions: Arc<SessionRegistry>,
    }

    fn fixture() -> Fixture {
        let metrics = LobbyMetrics::new();
        let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
        let chatters = Arc::new(Chatters::new(broadcaster.clone()));
        let store = Arc::new(MemoryModerationStore::new());
        let game_sessions = Arc::new(SessionRegistry::new());

        let moderation = Moderation::new(
            store.clone(),
            chatters.clone(),
            broadcaster,
            metrics,
        );
        moderation.register_registry(chatters.session_registry());
        moderation.register_registry(game_sessions.clone());

        Fixture {
            moderation,
            chatters,
            store,
            game_sessions,
        }
    }

    fn join(
        fixture: &Fixture,
        name: &str,
        ip: &str,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<ConnectionEvent>) {
        let (conn, rx) = ConnectionHandle::new(ip.parse().unwrap());
        fixture.chatters.session_registry().add(conn.clone());
        fixture.chatters.connect(&conn, name, false);
        (conn, rx)
    }

    fn frames(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ConnectionEvent::Frame(raw) = event {
                out.push(raw);
            }
        }
        out
    }

    #[test]
    fn test_format_ban_duration() {
        assert_eq!(format_ban_duration(1), "1 minutes");
        assert_eq!(format_ban_duration(59), "59 minutes");
        assert_eq!(format_ban_duration(60), "1 hours");
        assert_eq!(format_ban_duration(120), "2 hours");
        assert_eq!(format_ban_duration(150), "2 hours");
        assert_eq!(format_ban_duration(60 * 24 * 3), "3 days");
    }

    #[tokio::test]
    async fn test_ban_closes_across_registries() {
        let fixture = fixture();
        let (chat_conn, mut chat_rx) = join(&fixture, "Bob", "9.9.9.9");
        let (game_conn, game_rx) = ConnectionHandle::new("9.9.9.9".parse().unwrap());
        drop(game_rx);
        fixture.game_sessions.add(game_conn.clone());

        fixture
            .moderation
            .ban_by_ip("9.9.9.9".parse().unwrap(), "Bob", "", 120, "Admin")
            .unwrap();

        assert!(!chat_conn.is_open());
        assert!(!game_conn.is_open());

        // Bob was told before the close.
        let got = frames(&mut chat_rx);
        assert!(got
            .iter()
            .any(|f| f.contains("player-banned") && f.contains("banned for 2 hours")));

        let ban = fixture
            .store
            .ban_for("9.9.9.9".parse().unwrap())
            .expect("ban recorded");
        assert_eq!(ban.username, "Bob");
    }

    #[tokio::test]
    async fn test_ban_announced_to_remaining_chatters() {
        let fixture = fixture();
        let (_bob, _bob_rx) = join(&fixture, "Bob", "9.9.9.9");
        let (_alice, mut alice_rx) = join(&fixture, "Alice", "10.0.0.1");
        frames(&mut alice_rx);

        fixture
            .moderation
            .ban_by_ip("9.9.9.9".parse().unwrap(), "Bob", "", 120, "Admin")
            .unwrap();

        let got = frames(&mut alice_rx);
        assert!(got
            .iter()
            .any(|f| f.contains("Bob violated lobby rules and was banned for 2 hours")));
    }

    #[tokio::test]
    async fn test_ban_listeners_run_before_return() {
        let fixture = fixture();

        struct Counter(AtomicUsize);
        impl BanListener for Counter {
            fn on_ban(&self, ban: &BanRecord) {
                assert_eq!(ban.username, "Bob");
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        fixture.moderation.register_ban_listener(counter.clone());

        fixture
            .moderation
            .ban_by_ip("9.9.9.9".parse().unwrap(), "Bob", "", 60, "Admin")
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_by_ip_counts_connections() {
        let fixture = fixture();
        let (first, mut first_rx) = join(&fixture, "Bob", "9.9.9.9");
        let (second, second_rx) = ConnectionHandle::new("9.9.9.9".parse().unwrap());
        drop(second_rx);
        fixture.game_sessions.add(second.clone());

        let reached = fixture
            .moderation
            .shutdown_by_ip("9.9.9.9".parse().unwrap(), "Admin");
        assert_eq!(reached, 2);
        // The exit is the remote's to perform; nothing is closed here.
        assert!(first.is_open());
        assert!(second.is_open());
        assert!(frames(&mut first_rx)
            .iter()
            .any(|f| f.contains("shutdown-request")));
    }

    #[tokio::test]
    async fn test_disconnect_by_moderator() {
        let fixture = fixture();
        let (bob, _bob_rx) = join(&fixture, "Bob", "9.9.9.9");
        let (_alice, mut alice_rx) = join(&fixture, "Alice", "10.0.0.1");
        frames(&mut alice_rx);

        assert!(fixture.moderation.disconnect_by_moderator("Admin", "Bob"));
        assert!(!bob.is_open());
        assert!(frames(&mut alice_rx)
            .iter()
            .any(|f| f.contains("Bob was disconnected by a moderator")));

        assert!(!fixture.moderation.disconnect_by_moderator("Admin", "Bob"));
    }

    #[tokio::test]
    async fn test_moderator_actions_are_audited() {
        let fixture = fixture();
        let (_bob, _bob_rx) = join(&fixture, "Bob", "9.9.9.9");

        fixture
            .moderation
            .ban_by_ip("9.9.9.9".parse().unwrap(), "Bob", "", 60, "Admin")
            .unwrap();

        let audits = fixture.store.audit_entries();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].moderator, "Admin");
        assert_eq!(audits[0].action, "ban");
    }
}

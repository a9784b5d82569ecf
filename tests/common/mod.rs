//! Common test utilities for lobby integration tests.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use lobby_relay::broadcast::Broadcaster;
use lobby_relay::build_router;
use lobby_relay::chatters::Chatters;
use lobby_relay::guard::LifecycleGuard;
use lobby_relay::handler::{self, ConnectionDeps};
use lobby_relay::login::RsaLogin;
use lobby_relay::metrics::LobbyMetrics;
use lobby_relay::moderation::Moderation;
use lobby_relay::storage::MemoryModerationStore;
use lobby_relay::throttle::BadMessageThrottle;

/// A fully wired lobby stack on in-memory storage.
pub struct TestLobby {
    pub deps: ConnectionDeps,
    pub chatters: Arc<Chatters>,
    pub moderation: Arc<Moderation>,
    pub store: Arc<MemoryModerationStore>,
    pub login: Arc<RsaLogin>,
}

/// Builds the lobby stack the way `main` wires it, with a small RSA key and
/// the default bad-message budget.
#[allow(dead_code)]
pub fn test_lobby() -> TestLobby {
    test_lobby_with_throttle(5, Duration::from_secs(60))
}

#[allow(dead_code)]
pub fn test_lobby_with_throttle(max_bad_messages: u32, window: Duration) -> TestLobby {
    let metrics = LobbyMetrics::new();
    let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
    let store = Arc::new(MemoryModerationStore::new());
    let chatters = Arc::new(Chatters::new(broadcaster.clone()));

    let moderation = Arc::new(Moderation::new(
        store.clone(),
        chatters.clone(),
        broadcaster.clone(),
        metrics.clone(),
    ));
    moderation.register_registry(chatters.session_registry());

    // 3072 bits keeps keygen tolerable in tests; production uses 4096. One
    // keypair is shared across the whole test binary.
    static LOGIN: OnceLock<Arc<RsaLogin>> = OnceLock::new();
    let login = LOGIN
        .get_or_init(|| Arc::new(RsaLogin::with_key_bits(3072).unwrap()))
        .clone();

    let router = Arc::new(build_router(chatters.clone(), login.clone()));
    let guard = Arc::new(LifecycleGuard::new(
        router,
        BadMessageThrottle::new(max_bad_messages, window),
        store.clone(),
        broadcaster,
        metrics,
    ));

    TestLobby {
        deps: ConnectionDeps {
            guard,
            max_message_size: 1_048_576,
            idle_timeout: Duration::from_secs(5),
        },
        chatters,
        moderation,
        store,
        login,
    }
}

/// Starts a test server accepting WebSocket connections until the test ends.
/// Returns the URL to connect to.
#[allow(dead_code)]
pub async fn start_test_server(deps: ConnectionDeps) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let deps = deps.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    handler::handle_connection(ws, peer, deps).await;
                }
            });
        }
    });

    url
}

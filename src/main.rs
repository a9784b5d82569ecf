//! Lobby Relay Server
//!
//! A real-time messaging core for a game lobby. Provides:
//! - WebSocket endpoint carrying typed JSON message envelopes
//! - Chat presence, join/leave notices and status updates
//! - Moderation actions (ban, disconnect, shutdown) over an HTTP API
//! - RSA challenge-response login exchange
//! - Prometheus metrics

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

use lobby_relay::broadcast::Broadcaster;
use lobby_relay::build_router;
use lobby_relay::chatters::Chatters;
use lobby_relay::config::LobbyConfig;
use lobby_relay::guard::LifecycleGuard;
use lobby_relay::handler;
use lobby_relay::http::{create_router, HttpState};
use lobby_relay::login::RsaLogin;
use lobby_relay::metrics::LobbyMetrics;
use lobby_relay::moderation::Moderation;
use lobby_relay::storage::{create_moderation_store, ModerationStore};
use lobby_relay::throttle::BadMessageThrottle;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lobby_relay=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = LobbyConfig::from_env();

    info!("Starting Lobby Relay Server v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("HTTP API: {}", config.http_addr);
    info!("Storage backend: {:?}", config.storage_backend);
    info!("Idle timeout: {}s", config.idle_timeout_secs);

    // A keypair that cannot be generated is a deployment problem, not
    // something to limp along without.
    let login = Arc::new(RsaLogin::new().expect("RSA keypair generation failed"));
    info!("Login challenge keypair generated");

    let metrics = LobbyMetrics::new();
    let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));

    let store: Arc<dyn ModerationStore> = Arc::from(create_moderation_store(
        config.storage_backend,
        Some(&config.data_dir),
    ));

    let chatters = Arc::new(Chatters::new(broadcaster.clone()));
    let moderation = Arc::new(Moderation::new(
        store.clone(),
        chatters.clone(),
        broadcaster.clone(),
        metrics.clone(),
    ));
    moderation.register_registry(chatters.session_registry());

    let router = Arc::new(build_router(chatters, login));
    let guard = Arc::new(LifecycleGuard::new(
        router,
        BadMessageThrottle::new(config.max_bad_messages, config.bad_message_window()),
        store.clone(),
        broadcaster,
        metrics.clone(),
    ));

    if config.metrics_token.is_none() && !config.http_addr.ip().is_loopback() {
        warn!("HTTP API exposed on non-localhost without LOBBY_METRICS_TOKEN");
    }

    // Start HTTP server for moderation and metrics
    let http_state = HttpState {
        metrics,
        metrics_token: config.metrics_token.clone(),
        moderation,
        store,
    };
    let http_router = create_router(http_state);
    let http_addr = config.http_addr;
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");

    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        axum::serve(
            http_listener,
            http_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Start TCP listener for WebSocket
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");

    info!("WebSocket server listening on {}", config.listen_addr);

    let deps = handler::ConnectionDeps {
        guard,
        max_message_size: config.max_message_size,
        idle_timeout: config.idle_timeout(),
    };

    // Accept connections
    while let Ok((stream, peer)) = listener.accept().await {
        let deps = deps.clone();
        let idle_timeout = deps.idle_timeout;
        tokio::spawn(async move {
            // Handshake with timeout to prevent slowloris-style stalls
            match tokio::time::timeout(idle_timeout, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    handler::handle_connection(ws_stream, peer, deps).await;
                }
                Ok(Err(e)) => {
                    error!("WebSocket handshake failed: {}", e);
                }
                Err(_) => {
                    warn!("WebSocket handshake timeout (slowloris protection)");
                }
            }
        });
    }
}

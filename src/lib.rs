pub mod broadcast;
pub mod chatters;
pub mod config;
pub mod connection;
pub mod guard;
pub mod handler;
pub mod http;
pub mod login;
pub mod metrics;
pub mod moderation;
pub mod protocol;
pub mod router;
pub mod session_registry;
pub mod storage;
pub mod throttle;

use std::collections::HashMap;
use std::sync::Arc;

use chatters::Chatters;
use login::RsaLogin;
use protocol::{tags, ChatSent, ConnectToChat, MessageEnvelope, StatusUpdate};
use router::MessageRouter;

/// Builds the lobby message router: login exchange, chat join/relay, status
/// updates, with the presence registry subscribed to connection lifecycle
/// events.
pub fn build_router(chatters: Arc<Chatters>, login: Arc<RsaLogin>) -> MessageRouter {
    let join_chatters = chatters.clone();
    let chat_chatters = chatters.clone();
    let status_chatters = chatters.clone();
    let challenge_login = login.clone();

    MessageRouter::builder()
        .register(tags::LOGIN_REQUEST, move |conn, _env| {
            let envelope =
                MessageEnvelope::new(tags::LOGIN_CHALLENGE, &challenge_login.new_challenge())?;
            conn.send(&envelope);
            Ok(())
        })
        .register(tags::LOGIN_RESPONSE, move |conn, env| {
            let response: HashMap<String, String> = env.to_payload()?;
            if RsaLogin::is_anonymous(&response) {
                conn.send(&MessageEnvelope::empty(tags::LOGIN_SUCCESS));
                return Ok(());
            }
            if !RsaLogin::can_process_response(&response) {
                return Err("login response carries no credentials".to_string());
            }
            login.decrypt_password_for_action(&response, |_digest| ())?;
            conn.send(&MessageEnvelope::empty(tags::LOGIN_SUCCESS));
            Ok(())
        })
        .register(tags::CONNECT_TO_CHAT, move |conn, env| {
            let join: ConnectToChat = env.to_payload()?;
            if join.user_name.trim().is_empty() {
                return Err("user name must not be empty".to_string());
            }
            join_chatters.connect(conn, &join.user_name, join.moderator);
            Ok(())
        })
        .register(tags::CHAT_SENT, move |conn, env| {
            let chat: ChatSent = env.to_payload()?;
            chat_chatters.relay_chat(conn, &chat.message)
        })
        .register(tags::STATUS_UPDATE, move |conn, env| {
            let update: StatusUpdate = env.to_payload()?;
            let participant = status_chatters
                .participant_for(conn.id())
                .ok_or("status update from a connection that has not joined")?;
            status_chatters.update_status(&participant.user_name, &update.status);
            Ok(())
        })
        .listener(chatters)
        .build()
}

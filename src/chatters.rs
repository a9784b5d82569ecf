//! Presence Registry ("Chatters")
//!
//! Chat-specific layer above the session registry: one participant record
//! per connected chat session. Subscribes to the router's lifecycle hooks to
//! keep its session registry in sync and to announce departures when a
//! connection drops without an explicit leave.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::{
    self, tags, MessageEnvelope, ParticipantInfo, PlayerJoined, PlayerLeft, PlayerListing,
    StatusChanged,
};
use crate::router::ConnectionListener;
use crate::session_registry::SessionRegistry;

/// Status text is free-form but bounded.
const STATUS_MAX_LEN: usize = 100;

/// A connected chat identity's live state.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_name: String,
    /// Server-issued opaque session id, assigned at join.
    pub session_id: String,
    pub moderator: bool,
    pub status: String,
}

impl Participant {
    fn new(user_name: &str, moderator: bool) -> Self {
        Participant {
            user_name: user_name.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            moderator,
            status: String::new(),
        }
    }

    pub fn to_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_name: self.user_name.clone(),
            session_id: self.session_id.clone(),
            moderator: self.moderator,
            status: self.status.clone(),
        }
    }
}

/// Tracks one participant per open chat connection.
pub struct Chatters {
    sessions: Arc<SessionRegistry>,
    participants: RwLock<HashMap<ConnectionId, Participant>>,
    broadcaster: Arc<Broadcaster>,
}

impl Chatters {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Chatters {
            sessions: Arc::new(SessionRegistry::new()),
            participants: RwLock::new(HashMap::new()),
            broadcaster,
        }
    }

    /// The chat session registry, for wiring into moderation.
    pub fn session_registry(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    /// Accepts a join. Creates or replaces the participant for this
    /// connection, announces the join to everyone else, and returns the full
    /// roster to the new connection.
    pub fn connect(
        &self,
        connection: &Arc<ConnectionHandle>,
        user_name: &str,
        moderator: bool,
    ) -> Participant {
        let participant = Participant::new(user_name, moderator);
        {
            let mut participants = self.participants.write().unwrap();
            // A duplicate join from the same connection replaces the record.
            participants.insert(connection.id(), participant.clone());
        }

        info!("{} joined chat (session {})", user_name, connection.id());

        let joined = MessageEnvelope::new(
            tags::PLAYER_JOINED,
            &PlayerJoined {
                user_name: user_name.to_string(),
                moderator,
            },
        )
        .expect("join notice serializes");
        self.broadcaster
            .broadcast_except(&self.sessions.connections(), connection.id(), &joined);

        let listing = MessageEnvelope::new(
            tags::PLAYER_LISTING,
            &PlayerListing {
                chatters: self.roster(),
            },
        )
        .expect("roster serializes");
        self.broadcaster.send_to(connection, &listing);

        participant
    }

    /// Relays a chat line from a joined connection to every participant.
    /// Rejected when the connection has not joined.
    pub fn relay_chat(&self, connection: &Arc<ConnectionHandle>, message: &str) -> Result<(), String> {
        let from = {
            let participants = self.participants.read().unwrap();
            participants
                .get(&connection.id())
                .map(|p| p.user_name.clone())
                .ok_or("chat from a connection that has not joined")?
        };

        let envelope = MessageEnvelope::new(
            tags::CHAT_RECEIVED,
            &protocol::ChatReceived {
                from,
                message: message.to_string(),
            },
        )
        .map_err(|e| e.to_string())?;
        self.broadcaster
            .broadcast(&self.sessions.connections(), &envelope);
        Ok(())
    }

    /// Updates a participant's status text and announces the change.
    /// Returns false when the identity is not connected.
    pub fn update_status(&self, user_name: &str, status: &str) -> bool {
        let mut status = status.to_string();
        // Byte cap, popped back to a char boundary so multi-byte text never
        // splits mid-character.
        while status.len() > STATUS_MAX_LEN {
            status.pop();
        }

        let updated = {
            let mut participants = self.participants.write().unwrap();
            let mut found = false;
            for participant in participants.values_mut() {
                if participant.user_name == user_name {
                    participant.status = status.clone();
                    found = true;
                }
            }
            found
        };
        if !updated {
            return false;
        }

        let envelope = MessageEnvelope::new(
            tags::STATUS_CHANGED,
            &StatusChanged {
                user_name: user_name.to_string(),
                status,
            },
        )
        .expect("status notice serializes");
        self.broadcaster
            .broadcast(&self.sessions.connections(), &envelope);
        true
    }

    /// The participant bound to a connection, if it has joined.
    pub fn participant_for(&self, id: ConnectionId) -> Option<Participant> {
        let participants = self.participants.read().unwrap();
        participants.get(&id).cloned()
    }

    pub fn is_connected(&self, user_name: &str) -> bool {
        let participants = self.participants.read().unwrap();
        participants.values().any(|p| p.user_name == user_name)
    }

    /// Current roster snapshot.
    pub fn roster(&self) -> Vec<ParticipantInfo> {
        let participants = self.participants.read().unwrap();
        participants.values().map(|p| p.to_info()).collect()
    }

    /// Closes every connection belonging to an identity and announces the
    /// departure. Returns false (no-op, not an error) when the identity is
    /// not currently connected.
    pub fn disconnect_by_identity(&self, user_name: &str, reason: &str) -> bool {
        let matching: Vec<ConnectionId> = {
            let participants = self.participants.read().unwrap();
            participants
                .iter()
                .filter(|(_, p)| p.user_name == user_name)
                .map(|(id, _)| *id)
                .collect()
        };
        if matching.is_empty() {
            return false;
        }

        // Remove the records first so the close callback does not announce
        // the departure a second time.
        {
            let mut participants = self.participants.write().unwrap();
            for id in &matching {
                participants.remove(id);
            }
        }
        for connection in self.sessions.connections() {
            if matching.contains(&connection.id()) {
                connection.close(reason);
            }
        }

        info!("{} disconnected from chat: {}", user_name, reason);
        self.announce_departure(user_name);
        true
    }

    fn announce_departure(&self, user_name: &str) {
        let envelope = MessageEnvelope::new(
            tags::PLAYER_LEFT,
            &PlayerLeft {
                user_name: user_name.to_string(),
            },
        )
        .expect("departure notice serializes");
        self.broadcaster
            .broadcast(&self.sessions.connections(), &envelope);
    }
}

impl ConnectionListener for Chatters {
    fn on_open(&self, connection: &Arc<ConnectionHandle>) {
        self.sessions.add(connection.clone());
    }

    fn on_close(&self, connection: &Arc<ConnectionHandle>) {
        self.sessions.remove(connection.id());
        let departed = {
            let mut participants = self.participants.write().unwrap();
            participants.remove(&connection.id())
        };
        if let Some(participant) = departed {
            debug!("{} left chat (connection closed)", participant.user_name);
            self.announce_departure(&participant.user_name);
        }
    }
}

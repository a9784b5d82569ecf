//! WebSocket Connection Handler
//!
//! Handles individual client connections: accepts the socket, runs it past
//! the lifecycle guard, then multiplexes inbound frames and queued outbound
//! envelopes until either side closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::guard::LifecycleGuard;

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub guard: Arc<LifecycleGuard>,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

/// Handles a WebSocket connection until it closes.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    deps: ConnectionDeps,
) {
    let ConnectionDeps {
        guard,
        max_message_size,
        idle_timeout,
    } = deps;

    let (handle, mut outbound_rx) = ConnectionHandle::new(peer.ip());
    let session = handle.id();

    let (mut write, mut read) = ws_stream.split();

    if !guard.accept_connection(&handle) {
        // Deliver whatever the guard queued (the ban notice) before the
        // socket goes away.
        while let Ok(event) = outbound_rx.try_recv() {
            if let ConnectionEvent::Frame(raw) = event {
                let _ = write.send(Message::Text(raw)).await;
            }
        }
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    debug!("[{}] Client connected from {}", session, peer.ip());

    loop {
        tokio::select! {
            // Envelope queued by a handler, a broadcast, or moderation.
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(ConnectionEvent::Frame(raw)) => {
                        if write.send(Message::Text(raw)).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnectionEvent::Close(reason)) => {
                        debug!("[{}] Closing: {}", session, reason);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            // Frame from the client, with idle timeout.
            ws_msg = timeout(idle_timeout, read.next()) => {
                let msg = match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout (slowloris protection)", session);
                        break;
                    }
                };

                match msg {
                    Ok(Message::Text(text)) => {
                        if text.len() > max_message_size {
                            warn!("[{}] Message too large: {} bytes", session, text.len());
                            continue;
                        }
                        guard.handle_message(&handle, &text);
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) => {
                        debug!("[{}] Client sent close", session);
                        break;
                    }
                    Ok(_) => {
                        // Ignore binary, pong, etc.
                    }
                    Err(e) => {
                        warn!("[{}] Connection error: {}", session, e);
                        break;
                    }
                }
            }
        }
    }

    handle.close("connection closed");
    guard.handle_close(&handle);
}

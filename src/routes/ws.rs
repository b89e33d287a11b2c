//! WebSocket handler — per-connection session loop and command dispatch.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id, registers with the liveness
//! table, and enters a `select!` loop:
//! - Incoming text frames → decode + dispatch to the room service
//! - Outbound directives (peer broadcasts, liveness pings) → socket
//! - The liveness terminate signal → break, out-of-band so a backlogged
//!   outbound channel cannot swallow the cull
//!
//! Dispatch runs to completion before the loop polls again, so within one
//! room the order commands are applied equals the order they arrive, and a
//! joiner's `history` reply always hits the socket before any broadcast
//! queued for it.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register connection
//! 2. Client sends commands → dispatch → replies / broadcasts
//! 3. Close, error, or liveness terminate → leave room, roster update,
//!    reap check, deregister

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::{liveness, room};
use crate::state::{AppState, Outbound};

/// Outbound channel depth per connection.
const OUTBOUND_CAPACITY: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    let terminate = liveness::register(&state, client_id, tx.clone()).await;
    info!(%client_id, "ws: client connected");

    // The room this connection has joined, if any. Mutated only by
    // dispatch below.
    let mut current_room: Option<String> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_inbound_text(&state, &mut current_room, client_id, &tx, &text).await;
                        for reply in replies {
                            let _ = send_message(&mut socket, &reply).await;
                        }
                    }
                    Message::Pong(_) => liveness::mark_alive(&state, client_id).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(directive) = rx.recv() => {
                match directive {
                    Outbound::Message(message) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Ping => {
                        if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            () = terminate.notified() => {
                info!(%client_id, "ws: terminated by liveness sweep");
                break;
            }
        }
    }

    if let Some(room_id) = current_room {
        room::leave_room(&state, &room_id, client_id).await;
    }
    liveness::deregister(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode and apply one inbound command, returning replies for the sender.
///
/// Split from the socket loop so tests can drive dispatch without a live
/// websocket. Broadcasts to the sender travel through its outbound channel
/// like everyone else's; only direct replies come back here.
async fn process_inbound_text(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    tx: &mpsc::Sender<Outbound>,
    text: &str,
) -> Vec<ServerMessage> {
    let command: ClientMessage = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: malformed inbound message");
            return vec![ServerMessage::Error { message: format!("invalid message: {e}") }];
        }
    };

    match command {
        ClientMessage::Join { room_id } => {
            // Leaving the previous room first keeps membership consistent
            // when a client hops rooms on one connection.
            if let Some(old_room) = current_room.take() {
                room::leave_room(state, &old_room, client_id).await;
            }
            let history = room::join_room(state, &room_id, client_id, tx.clone()).await;
            *current_room = Some(room_id);
            vec![ServerMessage::History { history }]
        }
        ClientMessage::Admin { password } => {
            // An admin claim before any join references no room at all;
            // answer it the same way as a claim on a reaped room.
            let Some(room_id) = current_room.as_deref() else {
                return vec![ServerMessage::Error { message: room::RoomError::NotFound.to_string() }];
            };
            match room::claim_admin(state, room_id, client_id, &password).await {
                Ok(()) => vec![ServerMessage::AdminOk],
                Err(e) => vec![ServerMessage::Error { message: e.to_string() }],
            }
        }
        ClientMessage::Draw(stroke) => {
            // Unauthorized or room-less draws are dropped with no reply.
            if let Some(room_id) = current_room.as_deref() {
                room::append_draw(state, room_id, client_id, stroke).await;
            }
            Vec::new()
        }
        ClientMessage::Clear => {
            if let Some(room_id) = current_room.as_deref() {
                room::clear_history(state, room_id, client_id).await;
            }
            Vec::new()
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

//! Room service — registry, membership, authority, history, broadcast.
//!
//! DESIGN
//! ======
//! Every mutation takes the registry write lock for the whole operation, so
//! room invariants hold at every point a concurrent reader can observe:
//! the admin is always a member, history never exceeds the configured
//! limit, and two simultaneous first-joiners of a fresh id land in one
//! room. Delivery is `try_send` into each member's outbound channel —
//! best-effort, because a full or closed channel means the peer is already
//! on its way out and the close handler will finish the job.
//!
//! The roster is republished inside the same lock as the change it
//! reflects, so members never observe a membership change without the
//! matching `users` message queued behind it.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::protocol::{DrawRecord, RosterEntry, ServerMessage, Stroke, now_ms};
use crate::state::{AppState, Member, Outbound, Room};

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("invalid password")]
    BadPassword,
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a room, creating it on first use. Returns the history snapshot to
/// replay to the joiner, in original drawing order.
///
/// Create-and-insert happens under one write lock, so concurrent joins of
/// the same fresh id never produce two rooms.
pub async fn join_room(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Outbound>,
) -> Vec<DrawRecord> {
    let mut rooms = state.rooms.write().await;
    let created = !rooms.contains_key(room_id);
    let room = rooms.entry(room_id.to_string()).or_default();
    if created {
        info!(%room_id, "room created");
    }

    room.members.insert(client_id, Member { tx, is_admin: false, joined_at: now_ms() });
    info!(%room_id, %client_id, members = room.members.len(), "client joined room");

    let snapshot: Vec<DrawRecord> = room.history.iter().cloned().collect();
    publish_roster(room);
    snapshot
}

/// Leave a room. Releases the admin slot if held, republishes the roster to
/// the remaining members, and reaps the room once empty and past the idle
/// threshold. A reaped id behaves like a fresh room on the next join.
pub async fn leave_room(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };
    if room.members.remove(&client_id).is_none() {
        return;
    }

    if room.admin == Some(client_id) {
        room.admin = None;
        info!(%room_id, %client_id, "admin left, authority released");
    }
    info!(%room_id, %client_id, remaining = room.members.len(), "client left room");
    publish_roster(room);

    if room.members.is_empty() && room.created_at.elapsed() > state.config.room_idle {
        rooms.remove(room_id);
        info!(%room_id, "idle room reaped");
    }
}

// =============================================================================
// AUTHORITY
// =============================================================================

/// Claim drawing authority for a room.
///
/// A previous holder is demoted so authority stays exclusive; the roster
/// broadcast that follows is the only notification either side receives.
///
/// # Errors
///
/// `NotFound` if the room does not exist, `BadPassword` on a secret
/// mismatch. Neither changes room state.
pub async fn claim_admin(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    password: &str,
) -> Result<(), RoomError> {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return Err(RoomError::NotFound);
    };
    if password != state.config.admin_password {
        return Err(RoomError::BadPassword);
    }

    if let Some(previous) = room.admin.take() {
        if previous != client_id {
            if let Some(member) = room.members.get_mut(&previous) {
                member.is_admin = false;
            }
            info!(%room_id, %previous, "previous admin displaced");
        }
    }

    room.admin = Some(client_id);
    if let Some(member) = room.members.get_mut(&client_id) {
        member.is_admin = true;
    }
    info!(%room_id, %client_id, "admin claimed");

    publish_roster(room);
    Ok(())
}

// =============================================================================
// DRAW / CLEAR
// =============================================================================

/// Append a stroke to room history and relay it to every member, sender
/// included. Strokes from anyone but the admin are dropped without a reply.
pub async fn append_draw(state: &AppState, room_id: &str, client_id: Uuid, stroke: Stroke) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };
    if room.admin != Some(client_id) {
        return;
    }

    room.history.push_back(DrawRecord { stroke: stroke.clone(), timestamp: now_ms() });
    if room.history.len() > state.config.history_limit {
        room.history.pop_front();
    }

    broadcast(room, &ServerMessage::Draw(stroke), None);
}

/// Empty room history and notify every member. Admin only; non-admin
/// attempts are dropped silently like `draw`.
pub async fn clear_history(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };
    if room.admin != Some(client_id) {
        return;
    }

    room.history.clear();
    info!(%room_id, "canvas cleared");
    broadcast(room, &ServerMessage::Clear, None);
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Fan a message out to every member's outbound channel, optionally
/// excluding one connection. Iteration order is unspecified; per-member
/// delivery order matches call order.
pub fn broadcast(room: &Room, message: &ServerMessage, exclude: Option<Uuid>) {
    for (member_id, member) in &room.members {
        if exclude == Some(*member_id) {
            continue;
        }
        let _ = member.tx.try_send(Outbound::Message(message.clone()));
    }
}

/// Recompute the roster and broadcast it as a `users` message.
pub fn publish_roster(room: &Room) {
    let users: Vec<RosterEntry> = room
        .members
        .iter()
        .map(|(member_id, member)| RosterEntry {
            user_id: *member_id,
            is_admin: member.is_admin,
            joined_at: member.joined_at,
        })
        .collect();
    broadcast(room, &ServerMessage::Users { users }, None);
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;

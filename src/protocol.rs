//! Wire protocol — the typed messages exchanged over the WebSocket.
//!
//! DESIGN
//! ======
//! Every message is a JSON object tagged on `"type"`. Inbound commands and
//! outbound messages are separate enums because the sets only partially
//! overlap: `draw`/`clear` are relayed back out in the same shape they
//! arrive in, while `history`/`users`/`admin_ok`/`error` exist only
//! server→client. Stroke payloads pass through untouched; the one field the
//! server owns is the `timestamp` stamped onto history records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One stroke segment. Opaque to the server: no geometric validation, the
/// fields are relayed and stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub color: String,
    pub size: f64,
    pub tool: String,
}

/// A stroke as retained in room history. `timestamp` is assigned server-side
/// at append time so replay order stays trustworthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    #[serde(flatten)]
    pub stroke: Stroke,
    pub timestamp: i64,
}

/// One entry in the `users` roster broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: Uuid,
    pub is_admin: bool,
    /// Milliseconds since Unix epoch.
    pub joined_at: i64,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Client → server commands. Unknown `"type"` values fail deserialization
/// and are answered with an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { room_id: String },
    Admin { password: String },
    Draw(Stroke),
    Clear,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Canvas replay, sent once immediately after a join.
    History { history: Vec<DrawRecord> },
    /// Roster, sent after every membership or authority change.
    Users { users: Vec<RosterEntry> },
    /// Successful admin claim.
    AdminOk,
    Error { message: String },
    /// Relayed broadcasts, same shape as the inbound commands.
    Draw(Stroke),
    Clear,
}

// =============================================================================
// TESTS
// =============================================================================

//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns the room registry and the liveness table; there is no process-wide
//! singleton, so tests run independent registries side by side. Each room
//! holds its member handles, the admin slot, and a bounded FIFO of draw
//! records for replay to late joiners.
//!
//! All room mutations go through `services::room`, which holds the registry
//! write lock for the whole operation. The liveness table is touched only by
//! the sweep task and the per-connection pong handler.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock, mpsc};
use uuid::Uuid;

use crate::protocol::{DrawRecord, ServerMessage};

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_ROOM_IDLE_SECS: u64 = 3600;
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

// =============================================================================
// CONFIG
// =============================================================================

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret checked on `admin` claims.
    pub admin_password: String,
    /// Period of the liveness sweep.
    pub heartbeat_interval: Duration,
    /// How long an empty room survives before it is reaped.
    pub room_idle: Duration,
    /// Maximum draw records retained per room.
    pub history_limit: usize,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `ADMIN_PASSWORD` is unset.
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let admin_password = std::env::var("ADMIN_PASSWORD")?;
        Ok(Self {
            admin_password,
            heartbeat_interval: Duration::from_secs(env_parse(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            room_idle: Duration::from_secs(env_parse("ROOM_IDLE_SECS", DEFAULT_ROOM_IDLE_SECS)),
            history_limit: env_parse("HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// CONNECTION PLUMBING
// =============================================================================

/// Directives delivered to a connection's socket task through its outbound
/// channel. The socket task is the only code that writes to the socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialize and send an application message.
    Message(ServerMessage),
    /// Send a transport ping frame.
    Ping,
}

/// Liveness-table entry for one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub tx: mpsc::Sender<Outbound>,
    /// Cleared by each sweep pass, set again by pong acknowledgments.
    pub alive: bool,
    /// Terminate signal for the liveness cull. Separate from `tx`, which a
    /// dead peer's backlog can fill. The session's `select!` polls this and
    /// runs its normal disconnect cleanup.
    pub terminate: Arc<Notify>,
}

// =============================================================================
// ROOM
// =============================================================================

/// Per-room membership record for one connection.
#[derive(Debug, Clone)]
pub struct Member {
    pub tx: mpsc::Sender<Outbound>,
    pub is_admin: bool,
    /// Milliseconds since Unix epoch, reported in the roster.
    pub joined_at: i64,
}

/// A broadcast group keyed by a client-supplied id. Kept in memory only;
/// history does not survive the process or a reap.
#[derive(Debug)]
pub struct Room {
    /// Exclusive drawing authority. Nulled when the holder disconnects,
    /// never transferred automatically.
    pub admin: Option<Uuid>,
    /// Current members keyed by connection id.
    pub members: HashMap<Uuid, Member>,
    /// Bounded FIFO of draw records, oldest first.
    pub history: VecDeque<DrawRecord>,
    /// Used only for idle-room reaping.
    pub created_at: Instant,
}

impl Room {
    #[must_use]
    pub fn new() -> Self {
        Self {
            admin: None,
            members: HashMap::new(),
            history: VecDeque::new(),
            created_at: Instant::now(),
        }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms keyed by the client-supplied room id. Created lazily on
    /// first join, removed by the idle reap.
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,
    /// Every open connection, for the liveness sweep.
    pub connections: Arc<RwLock<HashMap<Uuid, ConnectionEntry>>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

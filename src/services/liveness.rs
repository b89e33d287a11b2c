//! Liveness sweep — periodic cull of unresponsive connections.
//!
//! DESIGN
//! ======
//! Two-strike heartbeat over the connection table: each pass terminates
//! connections whose flag never came back since the previous pass, then
//! clears the remaining flags and sends a transport ping. Pong handling in
//! the socket task restores the flag. The sweep itself never touches room
//! state; a terminated session runs the ordinary disconnect path when its
//! socket task sees the signal, which is what catches peers the transport
//! layer failed to report as closed.
//!
//! Pings ride the outbound channel best-effort, but the terminate signal
//! is a per-connection `Notify`: the connections most in need of culling
//! are exactly the ones whose outbound channel is already full of
//! undeliverable broadcasts, so the cull cannot share that path.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;
use uuid::Uuid;

use crate::state::{AppState, ConnectionEntry, Outbound};

/// Spawn the background liveness sweep. Returns a handle for shutdown.
pub fn spawn_liveness_task(state: AppState) -> JoinHandle<()> {
    let period = state.config.heartbeat_interval;
    info!(period_secs = period.as_secs(), "liveness sweep configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so fresh connections
        // get a full period before their first probe.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}

/// One heartbeat pass over every open connection.
pub async fn sweep_once(state: &AppState) {
    let mut connections = state.connections.write().await;
    for (client_id, entry) in connections.iter_mut() {
        if entry.alive {
            entry.alive = false;
            let _ = entry.tx.try_send(Outbound::Ping);
        } else {
            info!(%client_id, "no pong since last sweep, terminating connection");
            // notify_one stores a permit, so the signal lands even while
            // the session is mid-send rather than parked in its select.
            entry.terminate.notify_one();
        }
    }
}

/// Add a connection to the liveness table. Called once per session, at
/// upgrade time. Returns the terminate signal the session must poll.
pub async fn register(state: &AppState, client_id: Uuid, tx: mpsc::Sender<Outbound>) -> Arc<Notify> {
    let terminate = Arc::new(Notify::new());
    let mut connections = state.connections.write().await;
    connections.insert(
        client_id,
        ConnectionEntry { tx, alive: true, terminate: Arc::clone(&terminate) },
    );
    terminate
}

/// Remove a connection from the liveness table after its session ends.
pub async fn deregister(state: &AppState, client_id: Uuid) {
    let mut connections = state.connections.write().await;
    connections.remove(&client_id);
}

/// Record a pong acknowledgment from the transport layer.
pub async fn mark_alive(state: &AppState, client_id: Uuid) {
    let mut connections = state.connections.write().await;
    if let Some(entry) = connections.get_mut(&client_id) {
        entry.alive = true;
    }
}

#[cfg(test)]
#[path = "liveness_test.rs"]
mod tests;

//! Domain services used by the websocket dispatcher.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room state mutation and background upkeep so the
//! websocket route stays focused on transport and decode concerns.

pub mod liveness;
pub mod room;

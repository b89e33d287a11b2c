//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Two endpoints: the websocket upgrade at `/ws` carries the whole
//! protocol, and `/healthz` answers orchestration probes. A permissive
//! CORS layer keeps browser clients on other origins working.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

#[must_use]
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

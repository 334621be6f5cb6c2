//! Router assembly.
//!
//! The broker serves a single WebSocket endpoint at `/`. Every other request,
//! and any request to `/` that is not a WebSocket upgrade, receives
//! `501 Not Implemented`.

pub mod ws;

use axum::Router;
use axum::routing::any;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", any(ws::handle_ws))
        .fallback(ws::not_implemented)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

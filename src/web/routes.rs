//! API route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;
use super::websocket::ws_handler;
use super::AppState;

/// Create all API routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health_check))
        .route("/api/status", get(handlers::get_status))

        // Trading parameters
        .route("/api/config", get(handlers::get_config).put(handlers::update_config))

        // Engine control
        .route("/api/engine/start", post(handlers::start_engine))
        .route("/api/engine/stop", post(handlers::stop_engine))

        // Manual trades
        .route("/api/snipe", post(handlers::snipe))
        .route("/api/sell", post(handlers::sell))

        // Positions and exits
        .route("/api/positions", get(handlers::get_positions))
        .route("/api/orders", get(handlers::get_orders).post(handlers::create_order))
        .route("/api/orders/:id", delete(handlers::cancel_order))

        // Statistics
        .route("/api/stats", get(handlers::get_stats))

        // WebSocket
        .route("/ws", get(ws_handler))

        .with_state(state)
}

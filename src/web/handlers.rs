//! Request handlers for all API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::{error, info};

use super::models::*;
use super::AppState;
use crate::config::SniperConfig;
use crate::error::SniperError;
use crate::models::{LimitOrder, PositionStatus};
use crate::trading::{PerformanceStats, SellResult, SnipeResult};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// HTTP status an engine error maps to.
pub fn status_for(error: &SniperError) -> StatusCode {
    match error {
        SniperError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        SniperError::PositionNotFound(_) | SniperError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SniperError::InvalidTransition(_)
        | SniperError::AlreadyHolding(_)
        | SniperError::SnipeInFlight(_)
        | SniperError::AlreadyListening => StatusCode::CONFLICT,
        SniperError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        SniperError::TransientProvider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(message: &str, error: SniperError) -> (StatusCode, Json<ErrorResponse>) {
    error!("{}: {}", message, error);
    (
        status_for(&error),
        Json(ErrorResponse {
            error: message.to_string(),
            details: Some(error.to_string()),
        }),
    )
}

// ============================================================================
// Health & Status
// ============================================================================

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut watchers = Vec::with_capacity(state.watchers.len());
    for (name, watcher) in &state.watchers {
        watchers.push(WatcherStatus {
            name: name.clone(),
            listening: watcher.is_listening().await,
            stats: watcher.stats().await,
        });
    }

    Json(StatusResponse {
        engine: state.engine.status().await,
        monitor: MonitorStatus {
            running: state.monitor.is_running().await,
            tracked_tokens: state.monitor.tracked_tokens().await,
        },
        watchers,
    })
}

// ============================================================================
// Configuration
// ============================================================================

pub async fn get_config(State(state): State<AppState>) -> Json<SniperConfig> {
    Json(state.engine.config().await)
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(config): Json<SniperConfig>,
) -> ApiResult<SniperConfig> {
    state
        .engine
        .update_config(config)
        .await
        .map(Json)
        .map_err(|e| api_error("Invalid sniper config", e))
}

// ============================================================================
// Engine control
// ============================================================================

pub async fn start_engine(State(state): State<AppState>) -> ApiResult<SuccessResponse> {
    state
        .engine
        .start()
        .await
        .map_err(|e| api_error("Failed to start engine", e))?;
    info!("Engine started via API");
    Ok(Json(SuccessResponse {
        success: true,
        message: "Engine started".to_string(),
    }))
}

pub async fn stop_engine(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.engine.stop().await;
    info!("Engine stopped via API");
    Json(SuccessResponse {
        success: true,
        message: "Engine stopped".to_string(),
    })
}

// ============================================================================
// Manual trades
// ============================================================================

/// Trade outcomes are returned as-is; a failed trade is a 200 with
/// `success: false`.
pub async fn snipe(
    State(state): State<AppState>,
    Json(req): Json<SnipeRequest>,
) -> Json<SnipeResult> {
    info!("Manual snipe requested for {:?}", req.token_address);
    Json(state.engine.execute_snipe(req.token_address).await)
}

pub async fn sell(
    State(state): State<AppState>,
    Json(req): Json<SellRequest>,
) -> Json<SellResult> {
    info!("Manual sell requested for {:?}", req.token_address);
    let result = state.engine.sell_token(req.token_address, req.amount_tokens).await;
    if result.success && !state.store.is_holding(req.token_address).await {
        state.monitor.remove_token(req.token_address).await;
    }
    Json(result)
}

// ============================================================================
// Positions & Orders
// ============================================================================

pub async fn get_positions(
    State(state): State<AppState>,
    Query(query): Query<PositionsQuery>,
) -> Json<PositionsListResponse> {
    let mut positions = Vec::new();
    for position in state.engine.positions().await {
        if query.status.map_or(true, |s| s == position.status) {
            let last_price = match position.status {
                PositionStatus::Holding => state.monitor.last_price(position.token_address).await,
                _ => None,
            };
            positions.push(PositionView { position, last_price });
        }
    }
    let total = positions.len();
    Json(PositionsListResponse { positions, total })
}

pub async fn get_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Json<OrdersListResponse> {
    let orders: Vec<LimitOrder> = state
        .engine
        .orders()
        .await
        .into_iter()
        .filter(|o| query.status.map_or(true, |s| s == o.status))
        .filter(|o| query.token.map_or(true, |t| t == o.token_address))
        .collect();
    let total = orders.len();
    Json(OrdersListResponse { orders, total })
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<LimitOrder> {
    let order = state
        .exit
        .create_limit_order(
            req.token_address,
            req.order_type,
            req.target_price_base,
            req.amount_tokens,
            req.slippage_percent,
        )
        .await
        .map_err(|e| api_error("Failed to create order", e))?;

    // An explicit order on a held token needs a price feed.
    if let Some(position) = state.store.get_position(req.token_address).await {
        state.monitor.add_token(position.token_address, position.decimals).await;
    }
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<LimitOrder> {
    state
        .exit
        .cancel_limit_order(&id)
        .await
        .map(Json)
        .map_err(|e| api_error("Failed to cancel order", e))
}

// ============================================================================
// Statistics
// ============================================================================

pub async fn get_stats(State(state): State<AppState>) -> Json<PerformanceStats> {
    Json(state.engine.performance_stats().await)
}

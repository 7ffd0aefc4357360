//! Request and Response DTOs for the Web API

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::token::u256_dec;
use crate::models::{LimitOrder, OrderStatus, OrderType, PositionStatus, PriceSample, TokenPosition};
use crate::trading::{EngineStatus, WatcherStats};

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub tracked_tokens: Vec<Address>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub name: String,
    pub listening: bool,
    pub stats: WatcherStats,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub engine: EngineStatus,
    pub monitor: MonitorStatus,
    pub watchers: Vec<WatcherStatus>,
}

// ============================================================================
// Trades
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnipeRequest {
    pub token_address: Address,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellRequest {
    pub token_address: Address,
    /// Raw token units; defaults to the whole position.
    #[serde(default, with = "u256_dec::option")]
    pub amount_tokens: Option<U256>,
}

// ============================================================================
// Positions & Orders
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub status: Option<PositionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    #[serde(flatten)]
    pub position: TokenPosition,
    pub last_price: Option<PriceSample>,
}

#[derive(Debug, Serialize)]
pub struct PositionsListResponse {
    pub positions: Vec<PositionView>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<OrderStatus>,
    pub token: Option<Address>,
}

#[derive(Debug, Serialize)]
pub struct OrdersListResponse {
    pub orders: Vec<LimitOrder>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub token_address: Address,
    pub order_type: OrderType,
    pub target_price_base: Decimal,
    #[serde(default, with = "u256_dec::option")]
    pub amount_tokens: Option<U256>,
    pub slippage_percent: Option<Decimal>,
}

// ============================================================================
// Generic
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

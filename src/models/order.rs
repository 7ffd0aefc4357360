use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::u256_dec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    TakeProfit,
    StopLoss,
}

impl OrderType {
    /// Whether `price` crosses `target` in this order's direction.
    pub fn is_triggered(&self, price: Decimal, target: Decimal) -> bool {
        match self {
            Self::TakeProfit => price >= target,
            Self::StopLoss => price <= target,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "take_profit"),
            Self::StopLoss => write!(f, "stop_loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executed => write!(f, "executed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Emulated exit order, evaluated off-chain by the price monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrder {
    pub id: String,
    pub token_address: Address,
    pub order_type: OrderType,
    pub target_price_base: Decimal,
    #[serde(with = "u256_dec")]
    pub amount_tokens: U256,
    pub slippage_percent: Decimal,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<H256>,
    pub status: OrderStatus,
}

impl LimitOrder {
    pub fn new(
        token_address: Address,
        order_type: OrderType,
        target_price_base: Decimal,
        amount_tokens: U256,
        slippage_percent: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token_address,
            order_type,
            target_price_base,
            amount_tokens,
            slippage_percent,
            created_at: Utc::now(),
            executed_at: None,
            tx_hash: None,
            status: OrderStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn should_fire(&self, price: Decimal) -> bool {
        self.is_pending() && self.order_type.is_triggered(price, self.target_price_base)
    }
}

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::token::u256_dec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Holding,
    Sold,
    Failed, // Buy confirmed but nothing usable was received
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Sold => write!(f, "sold"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPosition {
    pub token_address: Address,                 // Key
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub buy_tx_hash: H256,
    pub buy_timestamp: DateTime<Utc>,
    pub buy_price_base: Decimal,                // Base units paid per whole token
    pub buy_amount_base: Decimal,               // Base units spent
    #[serde(with = "u256_dec")]
    pub amount_tokens: U256,                    // Raw token units held
    pub sell_tx_hash: Option<H256>,
    pub sell_timestamp: Option<DateTime<Utc>>,
    pub sell_price_base: Option<Decimal>,
    pub profit_loss_percent: Option<Decimal>,
    pub status: PositionStatus,
}

impl TokenPosition {
    pub fn is_holding(&self) -> bool {
        self.status == PositionStatus::Holding
    }
}

/// Realized P/L in percent, rounded to two places.
pub fn profit_loss_percent(buy_price: Decimal, sell_price: Decimal) -> Option<Decimal> {
    if buy_price.is_zero() {
        return None;
    }
    Some(((sell_price - buy_price) / buy_price * Decimal::ONE_HUNDRED).round_dp(2))
}

use anyhow::{Context, Result};
use chrono::Utc;
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tokio::{fs, sync::RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{SniperError, SniperResult};
use crate::models::position::profit_loss_percent;
use crate::models::{LimitOrder, OrderStatus, PositionStatus, TokenPosition};

const POSITIONS_FILE: &str = "positions.json";
const ORDERS_FILE: &str = "limit_orders.json";

/// Owns every position and limit order. Other components read clones and
/// request transitions through the methods below.
pub struct PositionStore {
    positions: RwLock<HashMap<Address, TokenPosition>>,
    orders: RwLock<HashMap<String, LimitOrder>>,
    // None keeps everything in memory.
    data_dir: Option<PathBuf>,
}

impl PositionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            data_dir: Some(data_dir.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    // --- Persistence ---

    async fn read_records<T: DeserializeOwned>(path: &PathBuf) -> Result<Vec<T>> {
        if !path.exists() {
            info!("{:?} not found, starting fresh.", path);
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).with_context(|| format!("Failed to deserialize {:?}", path))
    }

    async fn write_records<T: Serialize>(&self, file: &str, records: &[T]) -> SniperResult<()> {
        let dir = match &self.data_dir {
            Some(dir) => dir,
            None => return Ok(()),
        };
        fs::create_dir_all(dir)
            .await
            .map_err(|e| SniperError::Persistence(format!("Failed to create {:?}: {}", dir, e)))?;
        let data = serde_json::to_string_pretty(records)
            .map_err(|e| SniperError::Persistence(format!("Failed to serialize {}: {}", file, e)))?;
        let path = dir.join(file);
        fs::write(&path, data)
            .await
            .map_err(|e| SniperError::Persistence(format!("Failed to write {:?}: {}", path, e)))?;
        debug!("Saved {} records to {:?}", records.len(), path);
        Ok(())
    }

    /// Loads positions and orders from the data directory, replacing what is
    /// in memory.
    pub async fn load(&self) -> Result<()> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };

        let positions: Vec<TokenPosition> = Self::read_records(&dir.join(POSITIONS_FILE)).await?;
        let orders: Vec<LimitOrder> = Self::read_records(&dir.join(ORDERS_FILE)).await?;

        let mut positions_map = self.positions.write().await;
        positions_map.clear();
        for position in positions {
            positions_map.insert(position.token_address, position);
        }

        let mut orders_map = self.orders.write().await;
        orders_map.clear();
        for order in orders {
            orders_map.insert(order.id.clone(), order);
        }
        info!("Loaded {} positions and {} limit orders.", positions_map.len(), orders_map.len());
        Ok(())
    }

    async fn save_positions(&self) {
        let snapshot = self.positions().await;
        if let Err(e) = self.write_records(POSITIONS_FILE, &snapshot).await {
            error!("{}", e);
        }
    }

    async fn save_orders(&self) {
        let snapshot = self.orders().await;
        if let Err(e) = self.write_records(ORDERS_FILE, &snapshot).await {
            error!("{}", e);
        }
    }

    // --- Positions ---

    /// Records the outcome of a confirmed buy.
    pub async fn record_buy(&self, position: TokenPosition) -> SniperResult<TokenPosition> {
        let mut positions = self.positions.write().await;
        if let Some(existing) = positions.get(&position.token_address) {
            if existing.is_holding() {
                return Err(SniperError::AlreadyHolding(format!("{:?}", position.token_address)));
            }
            warn!(
                "Replacing {} position for {:?} with a new buy",
                existing.status, position.token_address
            );
        }

        info!(
            "Recording position {} ({:?}) | Spent: {} | Tokens: {} | Price: {} | Status: {}",
            position.symbol,
            position.token_address,
            position.buy_amount_base,
            position.amount_tokens,
            position.buy_price_base,
            position.status
        );
        positions.insert(position.token_address, position.clone());
        drop(positions); // Release lock before saving

        self.save_positions().await;
        Ok(position)
    }

    /// `holding -> sold` after a confirmed sell of the whole holding.
    pub async fn mark_sold(&self, token: Address, sell_tx_hash: H256, sell_price_base: Decimal) -> SniperResult<TokenPosition> {
        self.record_sale(token, None, sell_tx_hash, sell_price_base).await
    }

    /// Applies a confirmed sell of `amount` units (all of them when `None`).
    /// The position stays `holding` with the remainder until nothing is left,
    /// then becomes `sold`.
    pub async fn record_sale(
        &self,
        token: Address,
        amount: Option<U256>,
        sell_tx_hash: H256,
        sell_price_base: Decimal,
    ) -> SniperResult<TokenPosition> {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(&token)
            .ok_or_else(|| SniperError::PositionNotFound(format!("{:?}", token)))?;
        if !position.is_holding() {
            return Err(SniperError::InvalidTransition(format!(
                "position {:?} is {}, cannot mark sold",
                token, position.status
            )));
        }
        let amount = amount.unwrap_or(position.amount_tokens);
        if amount.is_zero() || amount > position.amount_tokens {
            return Err(SniperError::InvalidTransition(format!(
                "cannot sell {} of {} held units of {:?}",
                amount, position.amount_tokens, token
            )));
        }

        if amount < position.amount_tokens {
            position.amount_tokens -= amount;
            info!(
                "Partially sold {} ({:?}) | Sold: {} | Remaining: {} | Price: {} | Tx: {:?}",
                position.symbol, token, amount, position.amount_tokens, sell_price_base, sell_tx_hash
            );
        } else {
            position.status = PositionStatus::Sold;
            position.sell_tx_hash = Some(sell_tx_hash);
            position.sell_timestamp = Some(Utc::now());
            position.sell_price_base = Some(sell_price_base);
            position.profit_loss_percent = profit_loss_percent(position.buy_price_base, sell_price_base);

            info!(
                "Closed position {} ({:?}) | Sell price: {} | P/L: {:?}% | Tx: {:?}",
                position.symbol, token, sell_price_base, position.profit_loss_percent, sell_tx_hash
            );
        }
        let updated = position.clone();
        drop(positions);

        self.save_positions().await;
        Ok(updated)
    }

    pub async fn get_position(&self, token: Address) -> Option<TokenPosition> {
        self.positions.read().await.get(&token).cloned()
    }

    pub async fn is_holding(&self, token: Address) -> bool {
        self.positions
            .read()
            .await
            .get(&token)
            .map(|p| p.is_holding())
            .unwrap_or(false)
    }

    /// All positions, oldest first.
    pub async fn positions(&self) -> Vec<TokenPosition> {
        let mut all: Vec<TokenPosition> = self.positions.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.buy_timestamp);
        all
    }

    pub async fn holding_positions(&self) -> Vec<TokenPosition> {
        self.positions()
            .await
            .into_iter()
            .filter(|p| p.is_holding())
            .collect()
    }

    // --- Limit orders ---

    /// Stores a new pending order. The token must be held.
    pub async fn create_order(&self, order: LimitOrder) -> SniperResult<LimitOrder> {
        if !self.is_holding(order.token_address).await {
            return Err(SniperError::PositionNotFound(format!(
                "no holding position for {:?}",
                order.token_address
            )));
        }
        if !order.is_pending() {
            return Err(SniperError::InvalidTransition(format!(
                "new order {} must be pending, got {}",
                order.id, order.status
            )));
        }

        info!(
            "Created {} order {} for {:?} at {}",
            order.order_type, order.id, order.token_address, order.target_price_base
        );
        self.orders.write().await.insert(order.id.clone(), order.clone());
        self.save_orders().await;
        Ok(order)
    }

    async fn transition_order(
        &self,
        id: &str,
        to: OrderStatus,
        tx_hash: Option<H256>,
    ) -> SniperResult<LimitOrder> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| SniperError::OrderNotFound(id.to_string()))?;
        if order.status.is_terminal() {
            return Err(SniperError::InvalidTransition(format!(
                "order {} is already {}, cannot become {}",
                id, order.status, to
            )));
        }

        order.status = to;
        if to == OrderStatus::Executed {
            order.executed_at = Some(Utc::now());
            order.tx_hash = tx_hash;
        }
        debug!("Order {} -> {}", id, to);
        let updated = order.clone();
        drop(orders);

        self.save_orders().await;
        Ok(updated)
    }

    pub async fn cancel_order(&self, id: &str) -> SniperResult<LimitOrder> {
        self.transition_order(id, OrderStatus::Cancelled, None).await
    }

    pub async fn mark_order_executed(&self, id: &str, tx_hash: H256) -> SniperResult<LimitOrder> {
        self.transition_order(id, OrderStatus::Executed, Some(tx_hash)).await
    }

    pub async fn mark_order_failed(&self, id: &str) -> SniperResult<LimitOrder> {
        self.transition_order(id, OrderStatus::Failed, None).await
    }

    pub async fn get_order(&self, id: &str) -> Option<LimitOrder> {
        self.orders.read().await.get(id).cloned()
    }

    /// Pending orders for `token`, oldest first.
    pub async fn pending_orders_for(&self, token: Address) -> Vec<LimitOrder> {
        let mut pending: Vec<LimitOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.token_address == token && o.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.created_at);
        pending
    }

    pub async fn orders(&self) -> Vec<LimitOrder> {
        let mut all: Vec<LimitOrder> = self.orders.read().await.values().cloned().collect();
        all.sort_by_key(|o| o.created_at);
        all
    }
}

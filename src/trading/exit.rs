use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SniperError, SniperResult};
use crate::models::{LimitOrder, OrderType, TokenPosition};
use crate::trading::engine::ExecutionEngine;
use crate::trading::position::PositionStore;
use crate::trading::{ActivityEvent, ActivityFeed};

/// Turns exit targets into limit orders and fills them through the engine's
/// sell path.
pub struct ExitEngine {
    engine: Arc<ExecutionEngine>,
    store: Arc<PositionStore>,
    feed: ActivityFeed,
}

impl ExitEngine {
    pub fn new(engine: Arc<ExecutionEngine>, store: Arc<PositionStore>, feed: ActivityFeed) -> Self {
        Self { engine, store, feed }
    }

    /// Creates the configured take-profit and stop-loss orders for a freshly
    /// opened position. Does nothing when auto-sell is off.
    pub async fn create_auto_limit_orders(&self, position: &TokenPosition) -> Vec<LimitOrder> {
        let config = self.engine.config().await;
        if !config.auto_sell_enabled {
            return Vec::new();
        }
        if position.buy_price_base.is_zero() {
            warn!(
                "No buy price for {:?}, skipping automatic exit orders",
                position.token_address
            );
            return Vec::new();
        }

        let mut targets = Vec::new();
        if let Some(tp) = config.take_profit_percent {
            targets.push((
                OrderType::TakeProfit,
                position.buy_price_base * (Decimal::ONE + tp / Decimal::ONE_HUNDRED),
            ));
        }
        if let Some(sl) = config.stop_loss_percent {
            targets.push((
                OrderType::StopLoss,
                position.buy_price_base * (Decimal::ONE - sl / Decimal::ONE_HUNDRED),
            ));
        }

        let mut created = Vec::new();
        for (order_type, target) in targets {
            match self
                .create_limit_order(position.token_address, order_type, target, None, None)
                .await
            {
                Ok(order) => created.push(order),
                Err(e) => warn!(
                    "Failed to create {} order for {:?}: {}",
                    order_type, position.token_address, e
                ),
            }
        }
        created
    }

    /// Places an exit order against a held position. Amount and slippage
    /// default to the full holding and the configured slippage.
    pub async fn create_limit_order(
        &self,
        token: Address,
        order_type: OrderType,
        target_price_base: Decimal,
        amount_tokens: Option<U256>,
        slippage_percent: Option<Decimal>,
    ) -> SniperResult<LimitOrder> {
        if target_price_base <= Decimal::ZERO {
            return Err(SniperError::InvalidConfig(format!(
                "target price must be positive, got {}",
                target_price_base
            )));
        }
        let position = self
            .store
            .get_position(token)
            .await
            .ok_or_else(|| SniperError::PositionNotFound(format!("{:?}", token)))?;

        let amount = amount_tokens.unwrap_or(position.amount_tokens);
        if amount.is_zero() || amount > position.amount_tokens {
            return Err(SniperError::InvalidConfig(format!(
                "order amount {} outside held amount {}",
                amount, position.amount_tokens
            )));
        }
        let slippage = match slippage_percent {
            Some(s) if s < Decimal::ZERO || s >= Decimal::ONE_HUNDRED => {
                return Err(SniperError::InvalidConfig(format!(
                    "slippage must be in [0, 100), got {}",
                    s
                )))
            }
            Some(s) => s,
            None => self.engine.config().await.slippage_percent,
        };

        let order = self
            .store
            .create_order(LimitOrder::new(token, order_type, target_price_base, amount, slippage))
            .await?;
        self.feed.publish(ActivityEvent::OrderUpdated(order.clone()));
        Ok(order)
    }

    pub async fn cancel_limit_order(&self, id: &str) -> SniperResult<LimitOrder> {
        let order = self.store.cancel_order(id).await?;
        info!("Cancelled order {}", id);
        self.feed.publish(ActivityEvent::OrderUpdated(order.clone()));
        Ok(order)
    }

    /// Fills a fired order. A confirmed sell marks it executed; anything else
    /// marks it failed and leaves the position holding.
    pub async fn execute_order(&self, order: &LimitOrder, price: Decimal) -> SniperResult<LimitOrder> {
        // The order may have been cancelled between evaluation and now.
        let current = self
            .store
            .get_order(&order.id)
            .await
            .ok_or_else(|| SniperError::OrderNotFound(order.id.clone()))?;
        if !current.is_pending() {
            return Err(SniperError::InvalidTransition(format!(
                "order {} is {}",
                current.id, current.status
            )));
        }

        info!(
            "{} order {} fired for {:?}: price {} vs target {}",
            current.order_type, current.id, current.token_address, price, current.target_price_base
        );
        let result = self
            .engine
            .sell_with_slippage(
                current.token_address,
                Some(current.amount_tokens),
                Some(current.slippage_percent),
            )
            .await;

        let updated = match (result.success, result.tx_hash) {
            (true, Some(tx_hash)) => self.store.mark_order_executed(&current.id, tx_hash).await?,
            _ => {
                warn!(
                    "Order {} failed: {}",
                    current.id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                self.store.mark_order_failed(&current.id).await?
            }
        };
        self.feed.publish(ActivityEvent::OrderUpdated(updated.clone()));
        Ok(updated)
    }
}

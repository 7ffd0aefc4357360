use chrono::Utc;
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::chain::{ChainProvider, Wallet};
use crate::config::SniperConfig;
use crate::error::{SniperError, SniperResult};
use crate::models::position::profit_loss_percent;
use crate::models::token::{decimal_to_units, u256_dec, units_to_decimal};
use crate::models::{ChainEvent, LimitOrder, PositionStatus, TokenPosition};
use crate::trading::position::PositionStore;
use crate::trading::swap::{Quoter, SwapExecutor, BASE_DECIMALS};
use crate::trading::{ActivityEvent, ActivityFeed};
use crate::utils::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized, // No signing credential yet
    Initialized,
    Running,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnipeResult {
    pub success: bool,
    pub token_address: Address,
    pub tx_hash: Option<H256>,
    #[serde(with = "u256_dec::option")]
    pub amount_tokens: Option<U256>,
    pub error: Option<String>,
}

impl SnipeResult {
    fn failure(token_address: Address, error: &SniperError) -> Self {
        Self {
            success: false,
            token_address,
            tx_hash: None,
            amount_tokens: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellResult {
    pub success: bool,
    pub token_address: Address,
    pub tx_hash: Option<H256>,
    #[serde(with = "u256_dec::option")]
    pub amount_tokens: Option<U256>,
    pub price_base: Option<Decimal>,
    pub profit_loss_percent: Option<Decimal>,
    pub error: Option<String>,
}

impl SellResult {
    fn failure(token_address: Address, error: &SniperError) -> Self {
        Self {
            success: false,
            token_address,
            tx_hash: None,
            amount_tokens: None,
            price_base: None,
            profit_loss_percent: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub wallet_address: Option<Address>,
    pub auto_buy_enabled: bool,
    pub auto_sell_enabled: bool,
    pub snipes_in_flight: usize,
}

/// Aggregate trading results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub snipes_attempted: u64,
    pub snipes_succeeded: u64,
    pub open_positions: u32,
    pub failed_positions: u32,
    pub closed_trades: u32,
    pub winning_trades: u32,
    pub win_rate: Decimal,
    pub avg_profit_loss_percent: Decimal,
    pub total_spent_base: Decimal,
}

/// Fixed chain addresses and timeouts for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub router: Address,
    pub base_token: Address,
    pub launch_contract: Option<Address>,
    pub confirmation_timeout: Duration,
    pub retry: RetryPolicy,
}

// Removes the token from the in-flight set when the snipe finishes.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Address>>,
    token: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }
}

pub struct ExecutionEngine {
    provider: Arc<dyn ChainProvider>,
    quoter: Arc<Quoter>,
    store: Arc<PositionStore>,
    settings: EngineSettings,
    config: Arc<RwLock<SniperConfig>>,
    state: RwLock<EngineState>,
    executor: RwLock<Option<Arc<SwapExecutor>>>,
    in_flight: Mutex<HashSet<Address>>,
    position_tx: Option<mpsc::Sender<TokenPosition>>,
    feed: ActivityFeed,
    snipes_attempted: AtomicU64,
    snipes_succeeded: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        store: Arc<PositionStore>,
        config: SniperConfig,
        settings: EngineSettings,
        position_tx: Option<mpsc::Sender<TokenPosition>>,
        feed: ActivityFeed,
    ) -> Self {
        let quoter = Arc::new(Quoter::new(provider.clone(), settings.router, settings.base_token));
        Self {
            provider,
            quoter,
            store,
            settings,
            config: Arc::new(RwLock::new(config)),
            state: RwLock::new(EngineState::Uninitialized),
            executor: RwLock::new(None),
            in_flight: Mutex::new(HashSet::new()),
            position_tx,
            feed,
            snipes_attempted: AtomicU64::new(0),
            snipes_succeeded: AtomicU64::new(0),
        }
    }

    pub fn quoter(&self) -> Arc<Quoter> {
        self.quoter.clone()
    }

    pub fn store(&self) -> Arc<PositionStore> {
        self.store.clone()
    }

    // --- Lifecycle ---

    /// Installs the signing credential. Not allowed while running.
    pub async fn initialize(&self, wallet: Wallet) -> SniperResult<()> {
        let mut state = self.state.write().await;
        if *state == EngineState::Running {
            return Err(SniperError::InvalidTransition(
                "cannot replace the wallet while running".to_string(),
            ));
        }
        let address = wallet.address();
        let executor = SwapExecutor::new(
            self.provider.clone(),
            self.quoter.clone(),
            wallet,
            self.settings.router,
            self.settings.confirmation_timeout,
        );
        *self.executor.write().await = Some(Arc::new(executor));
        if *state == EngineState::Uninitialized {
            *state = EngineState::Initialized;
        }
        info!("Execution engine initialized with wallet {:?}", address);
        Ok(())
    }

    pub async fn start(&self) -> SniperResult<()> {
        let mut state = self.state.write().await;
        match *state {
            EngineState::Uninitialized => Err(SniperError::NotInitialized),
            EngineState::Running => {
                warn!("Execution engine start requested but already running.");
                Ok(())
            }
            EngineState::Initialized | EngineState::Stopped => {
                *state = EngineState::Running;
                info!("Execution engine started");
                Ok(())
            }
        }
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == EngineState::Running {
            *state = EngineState::Stopped;
            info!("Execution engine stopped");
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn status(&self) -> EngineStatus {
        let config = self.config.read().await;
        EngineStatus {
            state: self.state().await,
            wallet_address: self.executor.read().await.as_ref().map(|e| e.address()),
            auto_buy_enabled: config.auto_buy_enabled,
            auto_sell_enabled: config.auto_sell_enabled,
            snipes_in_flight: self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    // --- Configuration ---

    pub async fn config(&self) -> SniperConfig {
        self.config.read().await.clone()
    }

    /// Replaces the trading parameters after validating them.
    pub async fn update_config(&self, config: SniperConfig) -> SniperResult<SniperConfig> {
        config.validate()?;
        *self.config.write().await = config.clone();
        info!(
            "Sniper config updated: auto buy {}, amount {}, slippage {}%, auto sell {}",
            config.auto_buy_enabled, config.buy_amount_base, config.slippage_percent, config.auto_sell_enabled
        );
        Ok(config)
    }

    // --- Reads ---

    pub async fn positions(&self) -> Vec<TokenPosition> {
        self.store.positions().await
    }

    pub async fn orders(&self) -> Vec<LimitOrder> {
        self.store.orders().await
    }

    pub async fn performance_stats(&self) -> PerformanceStats {
        let positions = self.store.positions().await;
        let mut open_positions = 0;
        let mut failed_positions = 0;
        let mut closed_trades = 0;
        let mut winning_trades = 0;
        let mut total_pl = Decimal::ZERO;
        let mut total_spent_base = Decimal::ZERO;

        for position in &positions {
            total_spent_base += position.buy_amount_base;
            match position.status {
                PositionStatus::Holding => open_positions += 1,
                PositionStatus::Failed => failed_positions += 1,
                PositionStatus::Sold => {
                    closed_trades += 1;
                    let pl = position.profit_loss_percent.unwrap_or_default();
                    total_pl += pl;
                    if pl > Decimal::ZERO {
                        winning_trades += 1;
                    }
                }
            }
        }

        let (win_rate, avg_profit_loss_percent) = if closed_trades > 0 {
            let n = Decimal::from(closed_trades);
            (
                (Decimal::from(winning_trades) / n * Decimal::ONE_HUNDRED).round_dp(2),
                (total_pl / n).round_dp(2),
            )
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        PerformanceStats {
            snipes_attempted: self.snipes_attempted.load(Ordering::Relaxed),
            snipes_succeeded: self.snipes_succeeded.load(Ordering::Relaxed),
            open_positions,
            failed_positions,
            closed_trades,
            winning_trades,
            win_rate,
            avg_profit_loss_percent,
            total_spent_base,
        }
    }

    // --- Trading ---

    async fn executor(&self) -> SniperResult<Arc<SwapExecutor>> {
        self.executor
            .read()
            .await
            .clone()
            .ok_or(SniperError::NotInitialized)
    }

    /// Reacts to a detected chain event. Returns the snipe outcome when the
    /// event qualified and auto-buy is on; `None` otherwise.
    pub async fn handle_chain_event(&self, event: &ChainEvent) -> Option<SnipeResult> {
        if self.state().await != EngineState::Running {
            return None;
        }
        if !self.config.read().await.auto_buy_enabled {
            return None;
        }
        let target = match event.snipe_target(self.settings.launch_contract, self.settings.base_token) {
            Some(target) => target,
            None => {
                debug!("Event in tx {:?} does not qualify for a snipe", event.tx_hash());
                return None;
            }
        };
        info!("Launch detected for {:?} (block {})", target, event.block_number());
        Some(self.execute_snipe(target).await)
    }

    /// Buys `token` with the configured amount and records the position.
    /// Nothing is stored unless the buy is confirmed.
    pub async fn execute_snipe(&self, token: Address) -> SnipeResult {
        self.snipes_attempted.fetch_add(1, Ordering::Relaxed);
        let result = match self.snipe(token).await {
            Ok(position) => {
                if position.is_holding() {
                    self.snipes_succeeded.fetch_add(1, Ordering::Relaxed);
                    self.feed.publish(ActivityEvent::PositionOpened(position.clone()));
                    if let Some(tx) = &self.position_tx {
                        if let Err(e) = tx.send(position.clone()).await {
                            warn!("Position listener gone, {:?} will not be monitored: {}", token, e);
                        }
                    }
                }
                SnipeResult {
                    success: position.is_holding(),
                    token_address: token,
                    tx_hash: Some(position.buy_tx_hash),
                    amount_tokens: Some(position.amount_tokens),
                    error: (!position.is_holding())
                        .then(|| "buy confirmed but no tokens were received".to_string()),
                }
            }
            Err(e) => {
                error!("Snipe of {:?} failed: {}", token, e);
                SnipeResult::failure(token, &e)
            }
        };
        self.feed.publish(ActivityEvent::SnipeResult(result.clone()));
        result
    }

    async fn snipe(&self, token: Address) -> SniperResult<TokenPosition> {
        let executor = self.executor().await?;

        // Claimed before the holding check.
        let _guard = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(token) {
                return Err(SniperError::SnipeInFlight(format!("{:?}", token)));
            }
            InFlightGuard {
                set: &self.in_flight,
                token,
            }
        };
        if self.store.is_holding(token).await {
            return Err(SniperError::AlreadyHolding(format!("{:?}", token)));
        }

        let config = self.config().await;
        let amount_in = decimal_to_units(config.buy_amount_base, BASE_DECIMALS).ok_or_else(|| {
            SniperError::InvalidConfig(format!("buy amount {} not representable", config.buy_amount_base))
        })?;

        let metadata = self.quoter.token_metadata(token).await;
        let pending = executor.buy(token, amount_in, &config).await?;
        executor.confirm(pending.tx_hash).await?;

        let owner = executor.address();
        let quoter = &self.quoter;
        let balance = match retry_with_backoff(&self.settings.retry, "balanceOf", move || quoter.balance_of(token, owner)).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(
                    "Could not read balance of {:?} after buy ({}); assuming the quoted {}",
                    token, e, pending.expected_out
                );
                pending.expected_out
            }
        };

        let status = if balance.is_zero() {
            warn!("Buy {:?} confirmed but {:?} balance is zero", pending.tx_hash, token);
            PositionStatus::Failed
        } else {
            PositionStatus::Holding
        };
        let buy_price_base = units_to_decimal(balance, metadata.decimals)
            .filter(|tokens| !tokens.is_zero())
            .map(|tokens| config.buy_amount_base / tokens)
            .unwrap_or_default();

        let position = TokenPosition {
            token_address: token,
            symbol: metadata.symbol,
            name: metadata.name,
            decimals: metadata.decimals,
            buy_tx_hash: pending.tx_hash,
            buy_timestamp: Utc::now(),
            buy_price_base,
            buy_amount_base: config.buy_amount_base,
            amount_tokens: balance,
            sell_tx_hash: None,
            sell_timestamp: None,
            sell_price_base: None,
            profit_loss_percent: None,
            status,
        };
        self.store.record_buy(position).await
    }

    /// Sells the stored amount (or `amount`) of a held token using the
    /// configured slippage.
    pub async fn sell_token(&self, token: Address, amount: Option<U256>) -> SellResult {
        self.sell_with_slippage(token, amount, None).await
    }

    /// Sell path shared by operator requests and limit-order exits.
    pub async fn sell_with_slippage(
        &self,
        token: Address,
        amount: Option<U256>,
        slippage_percent: Option<Decimal>,
    ) -> SellResult {
        let result = match self.sell(token, amount, slippage_percent).await {
            Ok(sale) => {
                if let Some(position) = &sale.closed {
                    self.feed.publish(ActivityEvent::PositionClosed(position.clone()));
                }
                SellResult {
                    success: true,
                    token_address: token,
                    tx_hash: Some(sale.tx_hash),
                    amount_tokens: Some(sale.amount),
                    price_base: Some(sale.price_base),
                    profit_loss_percent: sale.profit_loss_percent,
                    error: None,
                }
            }
            Err(e) => {
                error!("Sell of {:?} failed: {}", token, e);
                SellResult::failure(token, &e)
            }
        };
        self.feed.publish(ActivityEvent::SellResult(result.clone()));
        result
    }

    async fn sell(
        &self,
        token: Address,
        amount: Option<U256>,
        slippage_percent: Option<Decimal>,
    ) -> SniperResult<Sale> {
        let executor = self.executor().await?;

        // Without a stored holding, an explicit amount sells tokens the
        // store does not know about.
        let (position, amount, decimals) = match (self.store.get_position(token).await, amount) {
            (Some(position), amount) if position.is_holding() => {
                let amount = amount.unwrap_or(position.amount_tokens);
                if amount > position.amount_tokens {
                    return Err(SniperError::InvalidConfig(format!(
                        "cannot sell {} units of {:?}, only {} held",
                        amount, token, position.amount_tokens
                    )));
                }
                let decimals = position.decimals;
                (Some(position), amount, decimals)
            }
            (Some(position), None) => {
                return Err(SniperError::InvalidTransition(format!(
                    "position {:?} is {}, nothing to sell",
                    token, position.status
                )))
            }
            (_, Some(amount)) => (None, amount, self.quoter.token_metadata(token).await.decimals),
            (None, None) => return Err(SniperError::PositionNotFound(format!("{:?}", token))),
        };
        if amount.is_zero() {
            return Err(SniperError::InvalidConfig("sell amount must be positive".to_string()));
        }

        let config = self.config().await;
        let slippage = slippage_percent.unwrap_or(config.slippage_percent);
        let pending = executor.sell(token, amount, slippage, &config).await?;
        executor.confirm(pending.tx_hash).await?;

        // Realized price per whole token, taken from the quote the sale was
        // submitted against.
        let price_base = match (
            units_to_decimal(pending.expected_out, BASE_DECIMALS),
            units_to_decimal(amount, decimals),
        ) {
            (Some(out), Some(sold)) if !sold.is_zero() => out / sold,
            _ => Decimal::ZERO,
        };

        // A partial sale leaves the remainder holding.
        let (closed, pnl) = match position {
            Some(position) => {
                let updated = self
                    .store
                    .record_sale(token, Some(amount), pending.tx_hash, price_base)
                    .await?;
                let pnl = profit_loss_percent(position.buy_price_base, price_base);
                ((!updated.is_holding()).then_some(updated), pnl)
            }
            None => {
                info!("Sold {} untracked units of {:?}", amount, token);
                (None, None)
            }
        };
        Ok(Sale {
            closed,
            amount,
            price_base,
            profit_loss_percent: pnl,
            tx_hash: pending.tx_hash,
        })
    }
}

struct Sale {
    /// Set once the sale emptied the position.
    closed: Option<TokenPosition>,
    amount: U256,
    price_base: Decimal,
    profit_loss_percent: Option<Decimal>,
    tx_hash: H256,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chain::mock::MockProvider;
    use crate::trading::swap::test_support::{addr, BASE_ADDR, DEV_KEY, ROUTER_ADDR};

    pub const LAUNCH_ADDR: u64 = 0x1a;

    pub fn settings() -> EngineSettings {
        EngineSettings {
            router: addr(ROUTER_ADDR),
            base_token: addr(BASE_ADDR),
            launch_contract: None,
            confirmation_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        }
    }

    pub async fn engine(
        mock: &Arc<MockProvider>,
        store: Arc<PositionStore>,
        config: SniperConfig,
        settings: EngineSettings,
    ) -> ExecutionEngine {
        let engine = ExecutionEngine::new(mock.clone(), store, config, settings, None, ActivityFeed::default());
        engine
            .initialize(Wallet::from_private_key(DEV_KEY, 31337).unwrap())
            .await
            .unwrap();
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::chain::mock::MockProvider;
    use crate::models::{FactoryVersion, MintEvent, PairCreatedEvent};
    use crate::trading::position::test_support::holding;
    use crate::trading::swap::test_support::{addr, script_token, BASE_ADDR, DEV_KEY};

    fn one_token() -> U256 {
        U256::exp10(18)
    }

    #[tokio::test]
    async fn test_uninitialized_engine_rejects_trades() {
        let mock = Arc::new(MockProvider::new(100));
        let engine = ExecutionEngine::new(
            mock,
            Arc::new(PositionStore::in_memory()),
            SniperConfig::default(),
            settings(),
            None,
            ActivityFeed::default(),
        );
        assert_eq!(engine.state().await, EngineState::Uninitialized);
        assert_eq!(engine.start().await, Err(SniperError::NotInitialized));

        let snipe = engine.execute_snipe(addr(0x70)).await;
        assert!(!snipe.success);
        assert_eq!(snipe.error, Some(SniperError::NotInitialized.to_string()));

        let sell = engine.sell_token(addr(0x70), None).await;
        assert!(!sell.success);
    }

    #[tokio::test]
    async fn test_state_machine() {
        let mock = Arc::new(MockProvider::new(100));
        let engine = engine(&mock, Arc::new(PositionStore::in_memory()), SniperConfig::default(), settings()).await;
        assert_eq!(engine.state().await, EngineState::Initialized);
        engine.start().await.unwrap();
        assert_eq!(engine.state().await, EngineState::Running);
        engine.stop().await;
        assert_eq!(engine.state().await, EngineState::Stopped);
        engine.start().await.unwrap();
        assert_eq!(engine.state().await, EngineState::Running);

        let wallet = Wallet::from_private_key(DEV_KEY, 1).unwrap();
        assert!(matches!(engine.initialize(wallet).await, Err(SniperError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_successful_snipe_records_holding_position() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), U256::from(5u64) * one_token());
        let store = Arc::new(PositionStore::in_memory());
        let (tx, mut rx) = mpsc::channel(4);
        let engine = ExecutionEngine::new(
            mock.clone(),
            store.clone(),
            SniperConfig::default(),
            settings(),
            Some(tx),
            ActivityFeed::default(),
        );
        engine
            .initialize(Wallet::from_private_key(DEV_KEY, 31337).unwrap())
            .await
            .unwrap();

        let result = engine.execute_snipe(token).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.amount_tokens, Some(one_token()));

        let position = store.get_position(token).await.unwrap();
        assert_eq!(position.status, PositionStatus::Holding);
        assert_eq!(position.symbol, "LAUNCH");
        // 0.01 base for exactly one token
        assert_eq!(position.buy_price_base, Decimal::new(1, 2));
        assert_eq!(rx.recv().await.map(|p| p.token_address), Some(token));

        let again = engine.execute_snipe(token).await;
        assert!(!again.success);
        assert!(again.error.unwrap().contains("Already holding"));
    }

    #[tokio::test]
    async fn test_in_flight_claim_precedes_holding_check() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), one_token());
        let store = Arc::new(PositionStore::in_memory());
        store.record_buy(holding(token, Decimal::new(1, 2))).await.unwrap();
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        engine.in_flight.lock().unwrap().insert(token);
        let result = engine.execute_snipe(token).await;
        assert!(result.error.unwrap().contains("in flight"));

        engine.in_flight.lock().unwrap().remove(&token);
        let result = engine.execute_snipe(token).await;
        assert!(result.error.unwrap().contains("Already holding"));
        assert!(engine.in_flight.lock().unwrap().is_empty());
        assert!(mock.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_buy_leaves_store_unchanged() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), one_token());
        mock.queue_receipt_status(0);
        let store = Arc::new(PositionStore::in_memory());
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let result = engine.execute_snipe(token).await;
        assert!(!result.success);
        assert!(store.positions().await.is_empty());
        assert!(store.orders().await.is_empty());
        assert_eq!(engine.status().await.snipes_in_flight, 0);
    }

    #[tokio::test]
    async fn test_zero_balance_buy_is_recorded_as_failed() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, U256::zero(), one_token());
        let store = Arc::new(PositionStore::in_memory());
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let result = engine.execute_snipe(token).await;
        assert!(!result.success);
        assert!(result.tx_hash.is_some());
        assert_eq!(store.get_position(token).await.unwrap().status, PositionStatus::Failed);
    }

    fn pair_event(token: Address) -> ChainEvent {
        ChainEvent::PairCreated(PairCreatedEvent {
            token0: addr(BASE_ADDR),
            token1: token,
            pair_address: addr(0x99),
            block_number: 100,
            tx_hash: H256::from_low_u64_be(1),
            timestamp: Utc::now(),
            factory_version: FactoryVersion::V2,
        })
    }

    #[tokio::test]
    async fn test_chain_events_only_snipe_when_running_with_auto_buy() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), one_token());
        let store = Arc::new(PositionStore::in_memory());
        let config = SniperConfig {
            auto_buy_enabled: true,
            ..SniperConfig::default()
        };
        let engine = engine(&mock, store.clone(), config, settings()).await;

        assert!(engine.handle_chain_event(&pair_event(token)).await.is_none());

        engine.start().await.unwrap();
        let mint = ChainEvent::Mint(MintEvent {
            token_address: token,
            recipient: addr(LAUNCH_ADDR),
            amount: one_token(),
            block_number: 100,
            tx_hash: H256::from_low_u64_be(2),
            timestamp: Utc::now(),
            log_index: 0,
        });
        // No launch contract configured, so mints never qualify.
        assert!(engine.handle_chain_event(&mint).await.is_none());

        let result = engine.handle_chain_event(&pair_event(token)).await.unwrap();
        assert!(result.success);
        assert!(store.is_holding(token).await);

        let mut config = engine.config().await;
        config.auto_buy_enabled = false;
        engine.update_config(config).await.unwrap();
        assert!(engine.handle_chain_event(&pair_event(addr(0x71))).await.is_none());
    }

    #[tokio::test]
    async fn test_mint_on_launch_contract_is_sniped() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), one_token());
        let store = Arc::new(PositionStore::in_memory());
        let config = SniperConfig {
            auto_buy_enabled: true,
            ..SniperConfig::default()
        };
        let engine = engine(
            &mock,
            store.clone(),
            config,
            EngineSettings {
                launch_contract: Some(addr(LAUNCH_ADDR)),
                ..settings()
            },
        )
        .await;
        engine.start().await.unwrap();

        // The pair's non-base side is not the launch contract.
        assert!(engine.handle_chain_event(&pair_event(token)).await.is_none());

        let mint = ChainEvent::Mint(MintEvent {
            token_address: token,
            recipient: addr(LAUNCH_ADDR),
            amount: one_token(),
            block_number: 101,
            tx_hash: H256::from_low_u64_be(3),
            timestamp: Utc::now(),
            log_index: 4,
        });
        let result = engine.handle_chain_event(&mint).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(engine.performance_stats().await.snipes_succeeded, 1);
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let mock = Arc::new(MockProvider::new(100));
        let engine = engine(&mock, Arc::new(PositionStore::in_memory()), SniperConfig::default(), settings()).await;
        let bad = SniperConfig {
            slippage_percent: Decimal::from(150),
            ..SniperConfig::default()
        };
        assert!(matches!(engine.update_config(bad).await, Err(SniperError::InvalidConfig(_))));
        assert_eq!(engine.config().await, SniperConfig::default());
    }

    #[tokio::test]
    async fn test_sell_marks_position_sold_with_profit() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        // Selling one token quotes 0.02 base.
        script_token(&mock, token, one_token(), U256::exp10(16) * 2);
        let store = Arc::new(PositionStore::in_memory());
        store.record_buy(holding(token, Decimal::new(1, 2))).await.unwrap();
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let result = engine.sell_token(token, None).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.price_base, Some(Decimal::new(2, 2)));
        assert_eq!(result.profit_loss_percent, Some(Decimal::from(100)));

        let position = store.get_position(token).await.unwrap();
        assert_eq!(position.status, PositionStatus::Sold);

        let stats = engine.performance_stats().await;
        assert_eq!(stats.closed_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.win_rate, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_remainder_holding() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), U256::exp10(16));
        let store = Arc::new(PositionStore::in_memory());
        store.record_buy(holding(token, Decimal::new(1, 2))).await.unwrap();
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let too_much = engine.sell_token(token, Some(one_token() * 2)).await;
        assert!(!too_much.success);
        assert!(mock.sent_transactions().is_empty());

        let half = one_token() / 2;
        let result = engine.sell_token(token, Some(half)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.amount_tokens, Some(half));

        let position = store.get_position(token).await.unwrap();
        assert_eq!(position.status, PositionStatus::Holding);
        assert_eq!(position.amount_tokens, half);
        assert_eq!(engine.performance_stats().await.closed_trades, 0);

        let rest = engine.sell_token(token, None).await;
        assert!(rest.success, "{:?}", rest.error);
        assert_eq!(rest.amount_tokens, Some(half));
        assert_eq!(store.get_position(token).await.unwrap().status, PositionStatus::Sold);
    }

    #[tokio::test]
    async fn test_sell_without_position_needs_amount() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), U256::exp10(16));
        let store = Arc::new(PositionStore::in_memory());
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let missing = engine.sell_token(token, None).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("Position not found"));

        let untracked = engine.sell_token(token, Some(one_token())).await;
        assert!(untracked.success, "{:?}", untracked.error);
        assert_eq!(untracked.price_base, Some(Decimal::new(1, 2)));
        assert_eq!(untracked.profit_loss_percent, None);
        assert!(store.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position_holding() {
        let mock = Arc::new(MockProvider::new(100));
        let token = addr(0x70);
        script_token(&mock, token, one_token(), one_token());
        mock.fail_next_send(SniperError::SubmissionFailed("nonce too low".into()));
        let store = Arc::new(PositionStore::in_memory());
        store.record_buy(holding(token, Decimal::new(1, 2))).await.unwrap();
        let engine = engine(&mock, store.clone(), SniperConfig::default(), settings()).await;

        let result = engine.sell_token(token, None).await;
        assert!(!result.success);
        assert!(store.is_holding(token).await);
    }
}

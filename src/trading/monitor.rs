use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::SniperResult;
use crate::models::{OrderStatus, PriceSample, TokenPosition};
use crate::trading::exit::ExitEngine;
use crate::trading::position::PositionStore;
use crate::trading::{ActivityEvent, ActivityFeed};
use crate::utils::{bounded_map, retry_with_backoff, RetryPolicy};

pub const DEFAULT_PRICE_INTERVAL: Duration = Duration::from_secs(10);

/// Where the monitor gets prices from. Prices are base units per whole token.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn token_price(&self, token: Address, decimals: u8) -> SniperResult<Decimal>;
}

/// Polls prices for tracked tokens and fires their exit orders.
pub struct PriceMonitor {
    price_source: Arc<dyn PriceSource>,
    exit: Arc<ExitEngine>,
    store: Arc<PositionStore>,
    feed: ActivityFeed,
    retry: RetryPolicy,
    concurrency: usize,
    tracked: RwLock<HashMap<Address, u8>>, // token -> decimals
    prices: RwLock<HashMap<Address, PriceSample>>,
    running: Arc<RwLock<bool>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PriceMonitor {
    pub fn new(
        price_source: Arc<dyn PriceSource>,
        exit: Arc<ExitEngine>,
        store: Arc<PositionStore>,
        feed: ActivityFeed,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            price_source,
            exit,
            store,
            feed,
            retry,
            concurrency,
            tracked: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            running: Arc::new(RwLock::new(false)),
            shutdown_tx,
        }
    }

    // --- Lifecycle ---

    /// Starts the evaluation loop. Calling it while running is a no-op.
    pub async fn start(self: &Arc<Self>, every: Duration) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Price monitor is already running");
            return;
        }
        *running = true;
        drop(running);

        info!(
            "Starting price monitor: every {}s, {} tokens tracked",
            every.as_secs_f64(),
            self.tracked.read().await.len()
        );

        let monitor = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Price monitor received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !*monitor.running.read().await {
                            break;
                        }
                        monitor.evaluate(true).await;
                    }
                }
            }
            debug!("Price monitor loop exited");
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        drop(running);
        let _ = self.shutdown_tx.send(());
        info!("Price monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    // --- Tracking ---

    pub async fn add_token(&self, token: Address, decimals: u8) {
        if self.tracked.write().await.insert(token, decimals).is_none() {
            info!("Tracking price of {:?}", token);
        }
    }

    /// Stops tracking `token`. Its orders are left as they are.
    pub async fn remove_token(&self, token: Address) {
        if self.tracked.write().await.remove(&token).is_some() {
            info!("Stopped tracking price of {:?}", token);
        }
        self.prices.write().await.remove(&token);
    }

    pub async fn tracked_tokens(&self) -> Vec<Address> {
        self.tracked.read().await.keys().copied().collect()
    }

    pub async fn is_tracking(&self, token: Address) -> bool {
        self.tracked.read().await.contains_key(&token)
    }

    pub async fn last_price(&self, token: Address) -> Option<PriceSample> {
        self.prices.read().await.get(&token).cloned()
    }

    /// Starts watching a newly opened position and places its automatic exits.
    pub async fn track_position(&self, position: &TokenPosition) {
        if !position.is_holding() {
            return;
        }
        self.add_token(position.token_address, position.decimals).await;
        let orders = self.exit.create_auto_limit_orders(position).await;
        if !orders.is_empty() {
            info!("Placed {} exit orders for {:?}", orders.len(), position.token_address);
        }
    }

    /// Resumes tracking for positions loaded from disk.
    pub async fn track_open_positions(&self) -> usize {
        let holding = self.store.holding_positions().await;
        for position in &holding {
            self.add_token(position.token_address, position.decimals).await;
        }
        holding.len()
    }

    // --- Evaluation ---

    /// Runs a single evaluation pass over every tracked token.
    pub async fn evaluate_once(&self) {
        self.evaluate(false).await;
    }

    async fn evaluate(&self, only_while_running: bool) {
        let tokens: Vec<(Address, u8)> = self
            .tracked
            .read()
            .await
            .iter()
            .map(|(token, decimals)| (*token, *decimals))
            .collect();
        if tokens.is_empty() {
            return;
        }

        let source = &self.price_source;
        let retry = &self.retry;
        let quotes = bounded_map(tokens, self.concurrency, |(token, decimals)| async move {
            let price = retry_with_backoff(retry, "token price", move || source.token_price(token, decimals)).await;
            (token, price)
        })
        .await;

        for (token, quote) in quotes {
            if only_while_running && !self.is_running().await {
                debug!("Price monitor stopped mid-tick, discarding remaining quotes");
                return;
            }
            // Removed while the quotes were in flight.
            if !self.is_tracking(token).await {
                continue;
            }
            let price = match quote {
                Ok(price) => price,
                Err(e) => {
                    warn!("Price unavailable for {:?}: {}", token, e);
                    continue;
                }
            };

            let sample = PriceSample {
                token_address: token,
                price_base: price,
                timestamp: Utc::now(),
            };
            self.prices.write().await.insert(token, sample.clone());
            self.feed.publish(ActivityEvent::PriceUpdate(sample));

            self.evaluate_orders(token, price).await;
        }
    }

    async fn evaluate_orders(&self, token: Address, price: Decimal) {
        for order in self.store.pending_orders_for(token).await {
            let position = match self.store.get_position(token).await {
                Some(position) if position.is_holding() => position,
                _ => {
                    self.remove_token(token).await;
                    return;
                }
            };
            // Left over from an earlier holding of the same token.
            if order.created_at < position.buy_timestamp {
                continue;
            }
            if !order.should_fire(price) {
                continue;
            }
            match self.exit.execute_order(&order, price).await {
                Ok(updated) if updated.status == OrderStatus::Executed => {
                    if !self.store.is_holding(token).await {
                        self.remove_token(token).await;
                        return;
                    }
                }
                Ok(updated) => {
                    warn!("{} order {} ended {}", updated.order_type, updated.id, updated.status);
                }
                Err(e) => error!("Could not execute order {}: {}", order.id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockProvider;
    use crate::config::SniperConfig;
    use crate::error::SniperError;
    use crate::models::OrderType;
    use crate::trading::engine::test_support::{engine, settings};
    use crate::trading::position::test_support::holding;
    use crate::trading::swap::test_support::{addr, script_token};
    use ethers::types::U256;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPrices {
        prices: Mutex<HashMap<Address, SniperResult<Decimal>>>,
    }

    impl ScriptedPrices {
        fn set(&self, token: Address, price: SniperResult<Decimal>) {
            self.prices.lock().unwrap().insert(token, price);
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedPrices {
        async fn token_price(&self, token: Address, _decimals: u8) -> SniperResult<Decimal> {
            self.prices
                .lock()
                .unwrap()
                .get(&token)
                .cloned()
                .unwrap_or_else(|| Err(SniperError::QuoteUnavailable("unscripted".into())))
        }
    }

    struct Harness {
        mock: Arc<MockProvider>,
        prices: Arc<ScriptedPrices>,
        store: Arc<PositionStore>,
        monitor: Arc<PriceMonitor>,
    }

    /// TP 100% and SL 50% on positions bought at 100 base per token.
    async fn harness() -> Harness {
        let mock = Arc::new(MockProvider::new(100));
        let prices = Arc::new(ScriptedPrices::default());
        let store = Arc::new(PositionStore::in_memory());
        let config = SniperConfig {
            auto_sell_enabled: true,
            take_profit_percent: Some(Decimal::from(100)),
            stop_loss_percent: Some(Decimal::from(50)),
            ..SniperConfig::default()
        };
        let engine = Arc::new(engine(&mock, store.clone(), config, settings()).await);
        let exit = Arc::new(ExitEngine::new(engine, store.clone(), ActivityFeed::default()));
        let monitor = Arc::new(PriceMonitor::new(
            prices.clone(),
            exit,
            store.clone(),
            ActivityFeed::default(),
            RetryPolicy::new(1, Duration::from_millis(1)),
            3,
        ));
        Harness { mock, prices, store, monitor }
    }

    async fn open(h: &Harness, token: Address) {
        script_token(&h.mock, token, U256::exp10(18), U256::exp10(18));
        let position = h.store.record_buy(holding(token, Decimal::from(100))).await.unwrap();
        h.monitor.track_position(&position).await;
    }

    async fn order_status(h: &Harness, token: Address, kind: OrderType) -> OrderStatus {
        h.store
            .orders()
            .await
            .into_iter()
            .find(|o| o.token_address == token && o.order_type == kind)
            .map(|o| o.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_take_profit_fires_at_target() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;

        h.prices.set(token, Ok(Decimal::from(199)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Pending);
        assert_eq!(h.monitor.last_price(token).await.unwrap().price_base, Decimal::from(199));

        h.prices.set(token, Ok(Decimal::from(200)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Executed);
        assert!(!h.store.is_holding(token).await);
        assert!(!h.monitor.is_tracking(token).await);
        assert!(h.monitor.last_price(token).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_loss_fires_at_target() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;

        h.prices.set(token, Ok(Decimal::from(51)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::StopLoss).await, OrderStatus::Pending);

        h.prices.set(token, Ok(Decimal::from(50)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::StopLoss).await, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn test_crash_fires_only_stop_loss() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;

        h.prices.set(token, Ok(Decimal::from(30)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::StopLoss).await, OrderStatus::Executed);
        // The take-profit never fired and stays as it was.
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Pending);
        assert_eq!(h.mock.sent_transactions().len(), 1);
        assert!(!h.monitor.is_tracking(token).await);

        // Leftover orders of a closed position never fire.
        h.monitor.add_token(token, 18).await;
        h.prices.set(token, Ok(Decimal::from(500)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Pending);
        assert_eq!(h.mock.sent_transactions().len(), 1);
        assert!(!h.monitor.is_tracking(token).await);
    }

    #[tokio::test]
    async fn test_orders_from_earlier_holding_do_not_fire_after_rebuy() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;
        h.prices.set(token, Ok(Decimal::from(30)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::StopLoss).await, OrderStatus::Executed);

        h.store.record_buy(holding(token, Decimal::from(100))).await.unwrap();
        h.monitor.add_token(token, 18).await;
        h.prices.set(token, Ok(Decimal::from(500)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Pending);
        assert_eq!(h.mock.sent_transactions().len(), 1);
        assert!(h.store.is_holding(token).await);
        assert!(h.monitor.is_tracking(token).await);
    }

    #[tokio::test]
    async fn test_failed_sell_leaves_position_holding() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;
        h.mock.queue_receipt_status(0);

        h.prices.set(token, Ok(Decimal::from(250)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Failed);
        assert_eq!(order_status(&h, token, OrderType::StopLoss).await, OrderStatus::Pending);
        assert!(h.store.is_holding(token).await);
        assert!(h.monitor.is_tracking(token).await);

        // Failed orders are never retried.
        h.monitor.evaluate_once().await;
        assert_eq!(h.mock.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_token_keeps_orders_pending() {
        let h = harness().await;
        let token = addr(0x70);
        open(&h, token).await;
        h.prices.set(token, Ok(Decimal::from(150)));
        h.monitor.evaluate_once().await;
        assert!(h.monitor.last_price(token).await.is_some());

        h.monitor.remove_token(token).await;
        h.monitor.remove_token(token).await;
        assert!(h.monitor.tracked_tokens().await.is_empty());
        assert!(h.monitor.last_price(token).await.is_none());
        assert_eq!(h.store.pending_orders_for(token).await.len(), 2);

        h.prices.set(token, Ok(Decimal::from(500)));
        h.monitor.evaluate_once().await;
        assert_eq!(order_status(&h, token, OrderType::TakeProfit).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_quote_failure_is_isolated() {
        let h = harness().await;
        let (a, b) = (addr(0x70), addr(0x71));
        open(&h, a).await;
        open(&h, b).await;

        h.prices.set(a, Err(SniperError::QuoteUnavailable("no liquidity".into())));
        h.prices.set(b, Ok(Decimal::from(120)));
        h.monitor.evaluate_once().await;
        assert!(h.monitor.last_price(a).await.is_none());
        assert_eq!(h.monitor.last_price(b).await.unwrap().price_base, Decimal::from(120));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let h = harness().await;
        assert!(!h.monitor.is_running().await);
        h.monitor.start(Duration::from_secs(3600)).await;
        h.monitor.start(Duration::from_secs(3600)).await;
        assert!(h.monitor.is_running().await);
        h.monitor.stop().await;
        h.monitor.stop().await;
        assert!(!h.monitor.is_running().await);
    }

    #[tokio::test]
    async fn test_resumes_open_positions() {
        let h = harness().await;
        h.store.record_buy(holding(addr(0x70), Decimal::ONE)).await.unwrap();
        assert_eq!(h.monitor.track_open_positions().await, 1);
        assert_eq!(h.monitor.tracked_tokens().await, vec![addr(0x70)]);
        // Resuming does not place new orders.
        assert!(h.store.orders().await.is_empty());
    }
}

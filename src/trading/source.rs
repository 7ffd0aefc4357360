// src/trading/source.rs
//
// Where a watcher's live logs come from. Poll mode walks the chain block by
// block; push mode drains a node subscription and degrades to polling if the
// node drops it.

use async_trait::async_trait;
use ethers::types::{Filter, Log};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::chain::contracts::LogPosition;
use crate::chain::{ChainProvider, LogSubscription};
use crate::error::SniperResult;
use crate::utils::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Polling,
    Subscription,
}

/// A stream of raw logs for one filter.
#[async_trait]
pub trait EventSource: Send {
    fn mode(&self) -> SourceMode;

    /// Waits for the next batch of logs. An empty batch means nothing new
    /// arrived this round.
    async fn next_logs(&mut self) -> SniperResult<Vec<Log>>;

    /// Highest block this source has fully covered.
    fn last_checked_block(&self) -> u64;
}

/// Fetches `[from, to]` in chunks of at most `max_range` blocks. Chunks that
/// fail after retries are logged and skipped. Returns the logs together with
/// the end of the contiguous range that was fetched successfully.
pub(crate) async fn fetch_range(
    provider: &Arc<dyn ChainProvider>,
    filter: &Filter,
    from: u64,
    to: u64,
    max_range: u64,
    retry: &RetryPolicy,
    stop_on_failure: bool,
) -> (Vec<Log>, Option<u64>) {
    let max_range = max_range.max(1);
    let mut logs = Vec::new();
    let mut covered = None;
    let mut start = from;

    while start <= to {
        let end = to.min(start.saturating_add(max_range - 1));
        let chunk = filter.clone().from_block(start).to_block(end);
        let chunk = &chunk;
        let result = retry_with_backoff(retry, "eth_getLogs", move || provider.get_logs(chunk)).await;
        match result {
            Ok(mut batch) => {
                debug!("Fetched {} logs for blocks {}..={}", batch.len(), start, end);
                logs.append(&mut batch);
                if covered.map_or(true, |c| c + 1 >= start) {
                    covered = Some(end);
                }
            }
            Err(e) => {
                warn!("Log query for blocks {}..={} failed: {}", start, end, e);
                if stop_on_failure {
                    break;
                }
            }
        }
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    (logs, covered)
}

// ============================================================================
// POLLING
// ============================================================================

pub struct PollingSource {
    provider: Arc<dyn ChainProvider>,
    filter: Filter,
    last_checked_block: u64,
    max_block_range: u64,
    retry: RetryPolicy,
    ticker: Interval,
}

impl PollingSource {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        filter: Filter,
        last_checked_block: u64,
        poll_interval: Duration,
        max_block_range: u64,
        retry: RetryPolicy,
    ) -> Self {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            provider,
            filter,
            last_checked_block,
            max_block_range,
            retry,
            ticker,
        }
    }
}

#[async_trait]
impl EventSource for PollingSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Polling
    }

    async fn next_logs(&mut self) -> SniperResult<Vec<Log>> {
        self.ticker.tick().await;

        let provider = &self.provider;
        let current = retry_with_backoff(&self.retry, "eth_blockNumber", move || provider.block_number()).await?;
        if current <= self.last_checked_block {
            return Ok(Vec::new());
        }

        // Only advance over the chunks that actually came back; a failed range
        // is asked for again on the next tick.
        let (logs, covered) = fetch_range(
            &self.provider,
            &self.filter,
            self.last_checked_block + 1,
            current,
            self.max_block_range,
            &self.retry,
            true,
        )
        .await;
        if let Some(covered) = covered {
            self.last_checked_block = covered;
        }
        Ok(logs)
    }

    fn last_checked_block(&self) -> u64 {
        self.last_checked_block
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Settings the subscription source needs to fall back to polling.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub retry: RetryPolicy,
}

pub struct SubscriptionSource {
    provider: Arc<dyn ChainProvider>,
    filter: Filter,
    subscription: Option<LogSubscription>,
    /// Live logs at or below this block were already covered by backfill.
    skip_through_block: u64,
    last_delivered: Option<LogPosition>,
    fallback_settings: FallbackSettings,
    fallback: Option<PollingSource>,
}

impl SubscriptionSource {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        filter: Filter,
        subscription: LogSubscription,
        skip_through_block: u64,
        fallback_settings: FallbackSettings,
    ) -> Self {
        Self {
            provider,
            filter,
            subscription: Some(subscription),
            skip_through_block,
            last_delivered: None,
            fallback_settings,
            fallback: None,
        }
    }

    fn start_fallback(&mut self) {
        // Re-scan the last delivered block; anything already delivered is
        // filtered out by position.
        let resume_from = match self.last_delivered {
            Some(pos) => pos.block_number.saturating_sub(1).max(self.skip_through_block),
            None => self.skip_through_block,
        };
        warn!("Log subscription ended; falling back to polling from block {}", resume_from + 1);
        let settings = &self.fallback_settings;
        self.fallback = Some(PollingSource::new(
            self.provider.clone(),
            self.filter.clone(),
            resume_from,
            settings.poll_interval,
            settings.max_block_range,
            settings.retry,
        ));
    }

    fn is_new(&self, log: &Log) -> bool {
        if log.removed == Some(true) {
            debug!("Skipping removed log {:?}", log.transaction_hash);
            return false;
        }
        let position = match LogPosition::of(log) {
            Ok(position) => position,
            // Let the decoder report it.
            Err(_) => return true,
        };
        if position.block_number <= self.skip_through_block {
            return false;
        }
        match self.last_delivered {
            Some(last) => (position.block_number, position.log_index) > (last.block_number, last.log_index),
            None => true,
        }
    }

    fn mark_delivered(&mut self, logs: &[Log]) {
        for log in logs {
            if let Ok(position) = LogPosition::of(log) {
                if self.last_delivered.map_or(true, |last| {
                    (position.block_number, position.log_index) > (last.block_number, last.log_index)
                }) {
                    self.last_delivered = Some(position);
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for SubscriptionSource {
    fn mode(&self) -> SourceMode {
        if self.fallback.is_some() {
            SourceMode::Polling
        } else {
            SourceMode::Subscription
        }
    }

    async fn next_logs(&mut self) -> SniperResult<Vec<Log>> {
        if let Some(poller) = self.fallback.as_mut() {
            let logs = poller.next_logs().await?;
            let fresh: Vec<Log> = logs.into_iter().filter(|log| self.is_new(log)).collect();
            self.mark_delivered(&fresh);
            return Ok(fresh);
        }

        let next = match self.subscription.as_mut() {
            Some(subscription) => subscription.logs.recv().await,
            None => None,
        };
        match next {
            Some(log) if self.is_new(&log) => {
                let batch = vec![log];
                self.mark_delivered(&batch);
                Ok(batch)
            }
            Some(_) => Ok(Vec::new()),
            None => {
                self.subscription = None;
                self.start_fallback();
                Ok(Vec::new())
            }
        }
    }

    fn last_checked_block(&self) -> u64 {
        match &self.fallback {
            Some(poller) => poller.last_checked_block(),
            None => self
                .last_delivered
                .map(|p| p.block_number)
                .unwrap_or(self.skip_through_block)
                .max(self.skip_through_block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::contracts::test_logs::mint_transfer;
    use crate::chain::mock::MockProvider;
    use ethers::types::Address;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_polling_advances_cursor_and_chunks_ranges() {
        let mock = Arc::new(MockProvider::new(110));
        mock.push_log(mint_transfer(addr(1), addr(2), 5, 103, 0));
        mock.push_log(mint_transfer(addr(1), addr(2), 6, 109, 0));
        let provider: Arc<dyn ChainProvider> = mock.clone();

        let mut source = PollingSource::new(provider, Filter::new(), 100, Duration::from_millis(5), 4, fast_retry());
        let logs = source.next_logs().await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(source.last_checked_block(), 110);
        // 101..=104, 105..=108, 109..=110
        assert_eq!(mock.get_logs_calls(), 3);

        let logs = source.next_logs().await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(mock.get_logs_calls(), 3);
    }

    #[tokio::test]
    async fn test_polling_keeps_cursor_on_range_failure() {
        let mock = Arc::new(MockProvider::new(105));
        mock.push_log(mint_transfer(addr(1), addr(2), 5, 104, 0));
        let provider: Arc<dyn ChainProvider> = mock.clone();
        let mut source = PollingSource::new(provider, Filter::new(), 100, Duration::from_millis(5), 100, fast_retry());

        mock.fail_next_get_logs(1);
        assert!(source.next_logs().await.unwrap().is_empty());
        assert_eq!(source.last_checked_block(), 100);

        let logs = source.next_logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(source.last_checked_block(), 105);
    }

    #[tokio::test]
    async fn test_subscription_skips_backfilled_and_removed_logs() {
        let mock = Arc::new(MockProvider::with_subscriptions(50));
        let provider: Arc<dyn ChainProvider> = mock.clone();
        let subscription = provider.subscribe_logs(&Filter::new()).await.unwrap();
        let settings = FallbackSettings {
            poll_interval: Duration::from_millis(5),
            max_block_range: 100,
            retry: fast_retry(),
        };
        let mut source = SubscriptionSource::new(provider, Filter::new(), subscription, 50, settings);

        mock.emit_live(mint_transfer(addr(1), addr(2), 1, 50, 0)).await;
        assert!(source.next_logs().await.unwrap().is_empty());

        let mut removed = mint_transfer(addr(1), addr(2), 1, 51, 0);
        removed.removed = Some(true);
        mock.emit_live(removed).await;
        assert!(source.next_logs().await.unwrap().is_empty());

        mock.emit_live(mint_transfer(addr(1), addr(2), 1, 51, 1)).await;
        assert_eq!(source.next_logs().await.unwrap().len(), 1);
        assert_eq!(source.mode(), SourceMode::Subscription);
        assert_eq!(source.last_checked_block(), 51);
    }

    #[tokio::test]
    async fn test_subscription_falls_back_to_polling_without_duplicates() {
        let mock = Arc::new(MockProvider::with_subscriptions(60));
        let provider: Arc<dyn ChainProvider> = mock.clone();
        let subscription = provider.subscribe_logs(&Filter::new()).await.unwrap();
        let settings = FallbackSettings {
            poll_interval: Duration::from_millis(5),
            max_block_range: 100,
            retry: fast_retry(),
        };
        let mut source = SubscriptionSource::new(provider, Filter::new(), subscription, 60, settings);

        let delivered = mint_transfer(addr(1), addr(2), 1, 61, 0);
        mock.push_log(delivered.clone());
        mock.emit_live(delivered).await;
        assert_eq!(source.next_logs().await.unwrap().len(), 1);

        mock.drop_subscription();
        assert!(source.next_logs().await.unwrap().is_empty());
        assert_eq!(source.mode(), SourceMode::Polling);

        mock.push_log(mint_transfer(addr(1), addr(2), 1, 61, 1));
        mock.push_log(mint_transfer(addr(1), addr(2), 1, 62, 0));
        mock.set_head(62);
        let logs = source.next_logs().await.unwrap();
        let positions: Vec<(u64, u64)> = logs
            .iter()
            .map(|l| {
                let p = LogPosition::of(l).unwrap();
                (p.block_number, p.log_index)
            })
            .collect();
        assert_eq!(positions, vec![(61, 1), (62, 0)]);
    }
}

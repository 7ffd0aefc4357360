// src/trading/watcher.rs
//
// Chain event watcher for pair creation and token mints. Backfills recent
// history, then tails live logs from an `EventSource`, handing normalized
// events to a callback in chain order.

use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, Filter, Log};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::chain::contracts::{self, decode_log, DecodedLog, LogPosition};
use crate::chain::ChainProvider;
use crate::error::{SniperError, SniperResult};
use crate::models::ChainEvent;
use crate::trading::source::{
    fetch_range, EventSource, FallbackSettings, PollingSource, SourceMode, SubscriptionSource,
};
use crate::utils::{bounded_map, retry_with_backoff, RetryPolicy, DEFAULT_CONCURRENCY};

pub type EventCallback = Arc<dyn Fn(ChainEvent) + Send + Sync>;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Blocks to backfill when no explicit start block is given.
    pub history_blocks: u64,
    pub max_block_range: u64,
    pub retry: RetryPolicy,
    pub concurrency: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(4_000),
            history_blocks: 1_000,
            max_block_range: 2_000,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// What a watcher looks for.
#[derive(Debug, Clone)]
pub enum WatchKind {
    /// Pair/pool creation on these factories.
    Pair { factories: Vec<Address> },
    /// Zero-address transfers, optionally for a single token contract.
    Mint { token: Option<Address> },
}

impl WatchKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Pair { .. } => "pair",
            Self::Mint { .. } => "mint",
        }
    }

    fn filter(&self, target: Option<Address>) -> Filter {
        match self {
            Self::Pair { factories } => contracts::pair_filter(factories),
            Self::Mint { token } => contracts::mint_filter(*token, target),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStats {
    pub logs_received: u64,
    pub events_emitted: u64,
    pub parse_failures: u64,
    pub last_checked_block: Option<u64>,
    pub mode: Option<SourceMode>,
}

// ============================================================================
// WATCHER
// ============================================================================

pub struct EventWatcher {
    provider: Arc<dyn ChainProvider>,
    kind: WatchKind,
    config: WatcherConfig,
    listening: Arc<RwLock<bool>>,
    shutdown_tx: broadcast::Sender<()>,
    stats: Arc<RwLock<WatcherStats>>,
}

/// Everything the live task needs, detached from the watcher itself.
struct Pipeline {
    provider: Arc<dyn ChainProvider>,
    label: &'static str,
    target: Option<Address>,
    callback: EventCallback,
    retry: RetryPolicy,
    concurrency: usize,
    listening: Arc<RwLock<bool>>,
    stats: Arc<RwLock<WatcherStats>>,
    /// Decoded events held back until their block timestamp resolves.
    deferred: Vec<(LogPosition, DecodedLog)>,
}

impl EventWatcher {
    pub fn new(provider: Arc<dyn ChainProvider>, kind: WatchKind, config: WatcherConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            provider,
            kind,
            config,
            listening: Arc::new(RwLock::new(false)),
            shutdown_tx,
            stats: Arc::new(RwLock::new(WatcherStats::default())),
        }
    }

    pub async fn is_listening(&self) -> bool {
        *self.listening.read().await
    }

    pub async fn stats(&self) -> WatcherStats {
        self.stats.read().await.clone()
    }

    /// Starts delivering events to `callback`.
    ///
    /// With `include_historical`, blocks `[from_block or head - history_blocks,
    /// head]` are delivered first, in `(block, logIndex)` order. Live events
    /// follow and are never interleaved with history.
    pub async fn start_listening(
        &self,
        callback: EventCallback,
        from_block: Option<u64>,
        include_historical: bool,
        filter_target: Option<Address>,
    ) -> SniperResult<()> {
        let mut listening = self.listening.write().await;
        if *listening {
            return Err(SniperError::AlreadyListening);
        }

        let label = self.kind.label();
        let provider = &self.provider;
        let head = retry_with_backoff(&self.config.retry, "eth_blockNumber", move || provider.block_number()).await?;
        let filter = self.kind.filter(filter_target);

        // Open the push subscription before backfilling so nothing mined in
        // between is lost; overlap is dropped by block number.
        let subscription = if self.provider.supports_subscriptions() {
            match self.provider.subscribe_logs(&filter).await {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!("[{}] Push subscription unavailable ({}), using polling", label, e);
                    None
                }
            }
        } else {
            None
        };

        let mut source: Box<dyn EventSource> = match subscription {
            Some(subscription) => Box::new(SubscriptionSource::new(
                self.provider.clone(),
                filter.clone(),
                subscription,
                if include_historical { head } else { 0 },
                FallbackSettings {
                    poll_interval: self.config.poll_interval,
                    max_block_range: self.config.max_block_range,
                    retry: self.config.retry,
                },
            )),
            None => Box::new(PollingSource::new(
                self.provider.clone(),
                filter.clone(),
                head,
                self.config.poll_interval,
                self.config.max_block_range,
                self.config.retry,
            )),
        };

        *listening = true;
        drop(listening);
        {
            let mut stats = self.stats.write().await;
            *stats = WatcherStats {
                last_checked_block: Some(head),
                mode: Some(source.mode()),
                ..Default::default()
            };
        }
        info!(
            "[{}] Watcher listening from block {} ({:?} mode, history: {})",
            label,
            head,
            source.mode(),
            include_historical
        );

        let mut pipeline = Pipeline {
            provider: self.provider.clone(),
            label,
            target: filter_target,
            callback,
            retry: self.config.retry,
            concurrency: self.config.concurrency,
            listening: self.listening.clone(),
            stats: self.stats.clone(),
            deferred: Vec::new(),
        };
        let history_from = from_block.unwrap_or_else(|| head.saturating_sub(self.config.history_blocks));
        let max_block_range = self.config.max_block_range;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if include_historical {
                let (logs, _) = fetch_range(
                    &pipeline.provider,
                    &filter,
                    history_from,
                    head,
                    max_block_range,
                    &pipeline.retry,
                    false,
                )
                .await;
                info!("[{}] Backfill {}..={} returned {} logs", pipeline.label, history_from, head, logs.len());
                pipeline.process(logs).await;
            }

            loop {
                if !*pipeline.listening.read().await {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("[{}] Watcher received shutdown signal", pipeline.label);
                        break;
                    }
                    result = source.next_logs() => {
                        match result {
                            Ok(logs) => {
                                pipeline.process(logs).await;
                                let mut stats = pipeline.stats.write().await;
                                stats.last_checked_block = Some(source.last_checked_block());
                                stats.mode = Some(source.mode());
                            }
                            Err(e) => error!("[{}] Watcher tick failed: {}", pipeline.label, e),
                        }
                    }
                }
            }
            info!("[{}] Watcher task finished", pipeline.label);
        });

        Ok(())
    }

    /// Stops the live loop. Safe to call repeatedly or when never started.
    pub async fn stop_listening(&self) {
        let mut listening = self.listening.write().await;
        if !*listening {
            return;
        }
        *listening = false;
        drop(listening);
        // No receivers just means the task already exited.
        let _ = self.shutdown_tx.send(());
        info!("[{}] Watcher stopped", self.kind.label());
    }
}

impl Pipeline {
    /// Decodes, timestamps and delivers a batch of logs in chain order.
    ///
    /// An event whose block timestamp cannot be read is held back, along with
    /// everything after it, and retried with the next batch.
    async fn process(&mut self, logs: Vec<Log>) {
        if logs.is_empty() && self.deferred.is_empty() {
            return;
        }

        let mut decoded: Vec<(LogPosition, DecodedLog)> = std::mem::take(&mut self.deferred);
        let mut parse_failures = 0u64;
        for log in &logs {
            match LogPosition::of(log).and_then(|pos| decode_log(log).map(|d| (pos, d))) {
                Ok((position, event)) => {
                    if let Some(target) = self.target {
                        if !event.involves(target) {
                            continue;
                        }
                    }
                    decoded.push((position, event));
                }
                Err(e) => {
                    parse_failures += 1;
                    debug!("[{}] Skipping undecodable log {:?}: {}", self.label, log.transaction_hash, e);
                }
            }
        }
        decoded.sort_by_key(|(position, _)| (position.block_number, position.log_index));

        let timestamps = self.block_timestamps(&decoded).await;

        let mut emitted = 0u64;
        let mut pending = decoded.into_iter();
        while let Some((position, event)) = pending.next() {
            // Results that land after a stop are discarded.
            if !*self.listening.read().await {
                debug!("[{}] Dropping in-flight events after stop", self.label);
                break;
            }
            let timestamp = match timestamps.get(&position.block_number) {
                Some(timestamp) => *timestamp,
                None => {
                    self.deferred.push((position, event));
                    self.deferred.extend(pending);
                    warn!(
                        "[{}] Holding back {} events from block {} until its timestamp is known",
                        self.label,
                        self.deferred.len(),
                        position.block_number
                    );
                    break;
                }
            };
            (self.callback)(event.into_event(position, timestamp));
            emitted += 1;
        }

        let mut stats = self.stats.write().await;
        stats.logs_received += logs.len() as u64;
        stats.parse_failures += parse_failures;
        stats.events_emitted += emitted;
    }

    async fn block_timestamps(&self, decoded: &[(LogPosition, DecodedLog)]) -> HashMap<u64, DateTime<Utc>> {
        let mut blocks: Vec<u64> = decoded.iter().map(|(p, _)| p.block_number).collect();
        blocks.dedup();

        let provider = &self.provider;
        let retry = &self.retry;
        let results = bounded_map(blocks, self.concurrency, |block| async move {
            let ts = retry_with_backoff(retry, "eth_getBlockByNumber", move || provider.block_timestamp(block)).await;
            (block, ts)
        })
        .await;

        results
            .into_iter()
            .filter_map(|(block, ts)| match ts {
                Ok(secs) => Utc.timestamp_opt(secs as i64, 0).single().map(|t| (block, t)),
                Err(e) => {
                    warn!("[{}] No timestamp for block {}: {}", self.label, block, e);
                    None
                }
            })
            .collect()
    }
}

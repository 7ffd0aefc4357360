pub mod engine;
pub mod exit;
pub mod monitor;
pub mod position;
pub mod source;
pub mod swap;
pub mod watcher;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ChainEvent, LimitOrder, PriceSample, TokenPosition};

pub use engine::{EngineSettings, EngineState, EngineStatus, ExecutionEngine, PerformanceStats, SellResult, SnipeResult};
pub use exit::ExitEngine;
pub use monitor::{PriceMonitor, PriceSource};
pub use position::PositionStore;
pub use source::{EventSource, PollingSource, SourceMode, SubscriptionSource};
pub use swap::{PendingSwap, Quoter, SwapExecutor};
pub use watcher::{EventCallback, EventWatcher, WatchKind, WatcherConfig, WatcherStats};

const FEED_CAPACITY: usize = 256;

/// Everything worth showing to an operator, in the order it happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActivityEvent {
    ChainEvent(ChainEvent),
    SnipeResult(SnipeResult),
    SellResult(SellResult),
    PositionOpened(TokenPosition),
    PositionClosed(TokenPosition),
    OrderUpdated(LimitOrder),
    PriceUpdate(PriceSample),
}

/// Fan-out of [`ActivityEvent`]s. Publishing never blocks and never fails;
/// subscribers that fall behind lose the oldest messages.
#[derive(Clone)]
pub struct ActivityFeed {
    tx: broadcast::Sender<ActivityEvent>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ActivityEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

//! REST API and WebSocket gateway for operating the sniper.

pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::trading::{
    ActivityEvent, ActivityFeed, EventWatcher, ExecutionEngine, ExitEngine, PositionStore, PriceMonitor,
};

/// Shared application state for all API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub exit: Arc<ExitEngine>,
    pub monitor: Arc<PriceMonitor>,
    pub store: Arc<PositionStore>,
    /// Named watchers, reported on the status endpoint
    pub watchers: Vec<(String, Arc<EventWatcher>)>,
    pub feed: ActivityFeed,
}

impl AppState {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        exit: Arc<ExitEngine>,
        monitor: Arc<PriceMonitor>,
        store: Arc<PositionStore>,
        feed: ActivityFeed,
    ) -> Self {
        Self {
            engine,
            exit,
            monitor,
            store,
            watchers: Vec::new(),
            feed,
        }
    }

    pub fn with_watcher(mut self, name: impl Into<String>, watcher: Arc<EventWatcher>) -> Self {
        self.watchers.push((name.into(), watcher));
        self
    }

    /// Get a new receiver for WebSocket messages
    pub fn subscribe_ws(&self) -> broadcast::Receiver<ActivityEvent> {
        self.feed.subscribe()
    }
}

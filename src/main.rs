use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use launch_sniper::chain::{ChainProvider, EvmClient, Wallet};
use launch_sniper::config::Config;
use launch_sniper::models::{ChainEvent, TokenPosition};
use launch_sniper::trading::{
    ActivityEvent, ActivityFeed, EngineSettings, EventCallback, EventWatcher, ExecutionEngine,
    ExitEngine, PositionStore, PriceMonitor, WatchKind, WatcherConfig,
};
use launch_sniper::utils::{RetryPolicy, DEFAULT_CONCURRENCY};
use launch_sniper::web::{server, AppState};

const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load environment variables
    dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    info!("Configuration loaded (chain id {})", config.chain_id);

    let provider: Arc<dyn ChainProvider> = Arc::new(
        EvmClient::connect(&config.rpc_url, config.ws_url.as_deref())
            .await
            .context("Failed to connect to RPC")?,
    );
    info!(
        "Connected to RPC (subscriptions: {})",
        provider.supports_subscriptions()
    );

    let store = Arc::new(PositionStore::new(&config.data_dir));
    store.load().await.context("Failed to load saved positions")?;

    let feed = ActivityFeed::default();
    let retry = RetryPolicy::default();
    let (position_tx, mut position_rx) = mpsc::channel::<TokenPosition>(EVENT_QUEUE);

    // Execution
    let engine = Arc::new(ExecutionEngine::new(
        provider.clone(),
        store.clone(),
        config.sniper.clone(),
        EngineSettings {
            router: config.router_address,
            base_token: config.base_token_address,
            launch_contract: config.launch_contract,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            retry,
        },
        Some(position_tx),
        feed.clone(),
    ));
    match &config.private_key {
        Some(key) => {
            let wallet = Wallet::from_private_key(key, config.chain_id).context("Invalid PRIVATE_KEY")?;
            info!("Wallet loaded: {:?}", wallet.address());
            engine.initialize(wallet).await?;
            engine.start().await?;
        }
        None => warn!("PRIVATE_KEY not set; trading is disabled until a wallet is configured"),
    }

    // Exits
    let exit = Arc::new(ExitEngine::new(engine.clone(), store.clone(), feed.clone()));
    let monitor = Arc::new(PriceMonitor::new(
        engine.quoter(),
        exit.clone(),
        store.clone(),
        feed.clone(),
        retry,
        DEFAULT_CONCURRENCY,
    ));
    let resumed = monitor.track_open_positions().await;
    if resumed > 0 {
        info!("Resumed price tracking for {} open positions", resumed);
    }
    monitor
        .start(Duration::from_secs(config.price_poll_interval_secs))
        .await;

    // New positions get price tracking and automatic exits
    {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            while let Some(position) = position_rx.recv().await {
                monitor.track_position(&position).await;
            }
        });
    }

    // Detected events are handled one at a time, off the watcher tasks
    let (event_tx, mut event_rx) = mpsc::channel::<ChainEvent>(EVENT_QUEUE);
    {
        let engine = engine.clone();
        let feed = feed.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                feed.publish(ActivityEvent::ChainEvent(event.clone()));
                if let Some(result) = engine.handle_chain_event(&event).await {
                    info!("Snipe of {:?}: success={}", result.token_address, result.success);
                }
            }
        });
    }
    let callback: EventCallback = Arc::new(move |event: ChainEvent| {
        if let Err(e) = event_tx.try_send(event) {
            error!("Dropping chain event, dispatcher is saturated: {}", e);
        }
    });

    let watcher_config = WatcherConfig {
        poll_interval: Duration::from_millis(config.watch_poll_interval_ms),
        history_blocks: config.history_blocks,
        max_block_range: config.max_block_range,
        retry,
        concurrency: DEFAULT_CONCURRENCY,
    };
    let mut state = AppState::new(engine.clone(), exit, monitor.clone(), store, feed);
    let mut watchers = Vec::new();

    if !config.factories.is_empty() {
        let factories = config.factories.iter().map(|f| f.address).collect();
        let watcher = Arc::new(EventWatcher::new(
            provider.clone(),
            WatchKind::Pair { factories },
            watcher_config.clone(),
        ));
        watcher.start_listening(callback.clone(), None, false, None).await?;
        info!("Watching {} factories for new pairs", config.factories.len());
        state = state.with_watcher("pairs", watcher.clone());
        watchers.push(watcher);
    }
    if config.launch_contract.is_some() || config.mint_watch_address.is_some() {
        let watcher = Arc::new(EventWatcher::new(
            provider.clone(),
            WatchKind::Mint {
                token: config.mint_watch_address,
            },
            watcher_config,
        ));
        watcher
            .start_listening(callback, None, false, config.launch_contract)
            .await?;
        info!("Watching mints (launch contract {:?})", config.launch_contract);
        state = state.with_watcher("mints", watcher.clone());
        watchers.push(watcher);
    }
    if watchers.is_empty() {
        warn!("No FACTORIES or LAUNCH_CONTRACT configured; only manual trading is available");
    }

    // Web API
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let host = config.api_host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
    let port = config.api_port.unwrap_or(3000);
    let server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(state, &host, port, server_shutdown).await {
            error!("API server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    for watcher in &watchers {
        watcher.stop_listening().await;
    }
    monitor.stop().await;
    engine.stop().await;
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    info!("Launch sniper stopped");
    Ok(())
}

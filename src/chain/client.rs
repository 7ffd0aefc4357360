use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, Ws};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes, Filter, Log,
    TransactionReceipt, H256, U256,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{ChainProvider, LogSubscription};
use crate::error::{SniperError, SniperResult};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// ethers-backed provider. HTTP endpoints are pull-only; a websocket
/// endpoint additionally serves push subscriptions.
#[derive(Clone)]
pub enum EvmClient {
    Http(Arc<Provider<Http>>),
    Ws(Arc<Provider<Ws>>),
}

// Dispatches a call to whichever transport backs the client.
macro_rules! with_provider {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            EvmClient::Http($p) => $body,
            EvmClient::Ws($p) => $body,
        }
    };
}

/// Maps an ethers provider error onto the domain taxonomy. Reverts and
/// balance problems are deterministic; everything else is treated as a
/// transport hiccup worth retrying.
pub(crate) fn classify_provider_error(err: ProviderError) -> SniperError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        SniperError::InsufficientFunds(message)
    } else if lower.contains("revert") {
        SniperError::CallReverted(message)
    } else {
        SniperError::TransientProvider(message)
    }
}

impl EvmClient {
    pub fn new_http(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;
        Ok(Self::Http(Arc::new(provider)))
    }

    pub async fn connect_ws(ws_url: &str) -> Result<Self> {
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .with_context(|| format!("Failed to connect to websocket endpoint {}", ws_url))?;
        Ok(Self::Ws(Arc::new(provider)))
    }

    /// Connects over websocket when a URL is given, falling back to HTTP if
    /// the websocket handshake fails.
    pub async fn connect(rpc_url: &str, ws_url: Option<&str>) -> Result<Self> {
        let client = match ws_url {
            Some(ws) => match Self::connect_ws(ws).await {
                Ok(client) => client,
                Err(e) => {
                    warn!("Websocket connection failed ({:#}); falling back to HTTP polling", e);
                    Self::new_http(rpc_url)?
                }
            },
            None => Self::new_http(rpc_url)?,
        };

        let block = client
            .block_number()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to reach RPC endpoint")?;
        info!(
            "Connected to chain via {} (current block {})",
            if client.supports_subscriptions() { "websocket" } else { "http" },
            block
        );
        Ok(client)
    }
}

/// Forwards a websocket log subscription into a channel until shutdown or
/// until the receiving side goes away.
async fn forward_subscription(
    provider: Arc<Provider<Ws>>,
    filter: Filter,
    tx: mpsc::Sender<Log>,
    mut shutdown_rx: broadcast::Receiver<()>,
    ready_tx: tokio::sync::oneshot::Sender<SniperResult<()>>,
) {
    let mut stream = match provider.subscribe_logs(&filter).await {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(classify_provider_error(e)));
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Log subscription shutdown requested");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(log) => {
                        if tx.send(log).await.is_err() {
                            debug!("Log subscription receiver dropped");
                            break;
                        }
                    }
                    None => {
                        warn!("Log subscription stream ended");
                        // Dropping `tx` signals the end to the consumer.
                        return;
                    }
                }
            }
        }
    }

    // The stream was established above, so it is safe to close here.
    if let Err(e) = stream.unsubscribe().await {
        warn!("Failed to unsubscribe log stream: {}", e);
    }
}

#[async_trait]
impl ChainProvider for EvmClient {
    async fn block_number(&self) -> SniperResult<u64> {
        with_provider!(self, p => p.get_block_number().await)
            .map(|n| n.as_u64())
            .map_err(classify_provider_error)
    }

    async fn get_logs(&self, filter: &Filter) -> SniperResult<Vec<Log>> {
        with_provider!(self, p => p.get_logs(filter).await).map_err(classify_provider_error)
    }

    async fn block_timestamp(&self, number: u64) -> SniperResult<u64> {
        let id = BlockId::Number(BlockNumber::Number(number.into()));
        let block = with_provider!(self, p => p.get_block(id).await).map_err(classify_provider_error)?;
        match block {
            Some(block) => Ok(block.timestamp.as_u64()),
            None => Err(SniperError::TransientProvider(format!("block {} not available yet", number))),
        }
    }

    async fn call(&self, tx: &TypedTransaction) -> SniperResult<Bytes> {
        with_provider!(self, p => p.call(tx, None).await).map_err(classify_provider_error)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> SniperResult<U256> {
        with_provider!(self, p => p.estimate_gas(tx, None).await).map_err(classify_provider_error)
    }

    async fn gas_price(&self) -> SniperResult<U256> {
        with_provider!(self, p => p.get_gas_price().await).map_err(classify_provider_error)
    }

    async fn transaction_count(&self, address: Address) -> SniperResult<U256> {
        let pending = Some(BlockId::Number(BlockNumber::Pending));
        with_provider!(self, p => p.get_transaction_count(address, pending).await)
            .map_err(classify_provider_error)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> SniperResult<H256> {
        let result = with_provider!(self, p => p.send_raw_transaction(raw).await.map(|pending| pending.tx_hash()));
        result.map_err(|e| match classify_provider_error(e) {
            SniperError::InsufficientFunds(msg) => SniperError::InsufficientFunds(msg),
            other => {
                error!("Failed to send transaction: {}", other);
                SniperError::SubmissionFailed(other.to_string())
            }
        })
    }

    async fn transaction_receipt(&self, hash: H256) -> SniperResult<Option<TransactionReceipt>> {
        with_provider!(self, p => p.get_transaction_receipt(hash).await).map_err(classify_provider_error)
    }

    fn supports_subscriptions(&self) -> bool {
        matches!(self, Self::Ws(_))
    }

    async fn subscribe_logs(&self, filter: &Filter) -> SniperResult<LogSubscription> {
        let provider = match self {
            Self::Ws(p) => p.clone(),
            Self::Http(_) => {
                return Err(SniperError::TransientProvider(
                    "HTTP provider cannot open push subscriptions".to_string(),
                ))
            }
        };

        let (log_tx, log_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(forward_subscription(provider, filter.clone(), log_tx, shutdown_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(LogSubscription::new(log_rx, shutdown_tx)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SniperError::TransientProvider(
                "log subscription task exited before confirming".to_string(),
            )),
        }
    }
}

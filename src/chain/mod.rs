//! Boundary to the EVM node. Everything above this module talks to the chain
//! through [`ChainProvider`], so tests can swap in a scripted provider.

pub mod client;
pub mod contracts;
pub mod wallet;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Bytes, Filter, Log, TransactionReceipt, H256, U256,
};
use ethers::types::Address;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::{SniperError, SniperResult};

pub use client::EvmClient;
pub use wallet::Wallet;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Live log feed handed out by a push-capable provider.
///
/// Dropping the handle (or calling [`LogSubscription::close`]) tells the
/// forwarding task to unsubscribe.
pub struct LogSubscription {
    pub logs: mpsc::Receiver<Log>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LogSubscription {
    pub fn new(logs: mpsc::Receiver<Log>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { logs, shutdown_tx }
    }

    pub fn close(&self) {
        // No receivers means the forwarding task already exited.
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn block_number(&self) -> SniperResult<u64>;

    async fn get_logs(&self, filter: &Filter) -> SniperResult<Vec<Log>>;

    /// Unix timestamp (seconds) of the given block.
    async fn block_timestamp(&self, number: u64) -> SniperResult<u64>;

    async fn call(&self, tx: &TypedTransaction) -> SniperResult<Bytes>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> SniperResult<U256>;

    async fn gas_price(&self) -> SniperResult<U256>;

    /// Pending nonce for `address`.
    async fn transaction_count(&self, address: Address) -> SniperResult<U256>;

    async fn send_raw_transaction(&self, raw: Bytes) -> SniperResult<H256>;

    async fn transaction_receipt(&self, hash: H256) -> SniperResult<Option<TransactionReceipt>>;

    fn supports_subscriptions(&self) -> bool {
        false
    }

    async fn subscribe_logs(&self, _filter: &Filter) -> SniperResult<LogSubscription> {
        Err(SniperError::TransientProvider(
            "provider does not support push subscriptions".to_string(),
        ))
    }

    /// Polls for the receipt of `hash` until it is buried under
    /// `confirmations` blocks. Returns the receipt whatever its status; callers
    /// decide what a reverted receipt means.
    async fn wait_for_confirmation(
        &self,
        hash: H256,
        confirmations: u64,
        timeout: Duration,
    ) -> SniperResult<TransactionReceipt> {
        let started = Instant::now();
        loop {
            match self.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let mined_at = receipt.block_number.map(|b| b.as_u64());
                    if let Some(mined_at) = mined_at {
                        let head = self.block_number().await.unwrap_or(mined_at);
                        if head + 1 >= mined_at + confirmations.max(1) {
                            return Ok(receipt);
                        }
                    }
                    debug!("Transaction {:?} mined, waiting for {} confirmations", hash, confirmations);
                }
                Ok(None) => debug!("Transaction {:?} not yet mined", hash),
                Err(e) if e.is_transient() => debug!("Receipt lookup for {:?} failed: {}", hash, e),
                Err(e) => return Err(e),
            }

            if started.elapsed() >= timeout {
                return Err(SniperError::ConfirmationTimeout(format!("{:?}", hash)));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}

/// Whether a mined receipt reports success.
pub fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false)
}

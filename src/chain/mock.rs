//! Scripted in-memory provider for unit tests.

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Filter, Log, TransactionReceipt, H256,
    U256, U64,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::{ChainProvider, LogSubscription};
use crate::error::{SniperError, SniperResult};

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

pub fn selector(signature: &str) -> [u8; 4] {
    ethers::utils::id(signature)
}

pub fn encode_uint(value: U256) -> Bytes {
    encode(&[Token::Uint(value)]).into()
}

pub fn encode_uints(values: &[U256]) -> Bytes {
    encode(&[Token::Array(values.iter().map(|v| Token::Uint(*v)).collect())]).into()
}

pub fn encode_string(value: &str) -> Bytes {
    encode(&[Token::String(value.to_string())]).into()
}

#[derive(Default)]
pub struct MockProvider {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    responses: Mutex<HashMap<(Option<Address>, [u8; 4]), SniperResult<Bytes>>>,
    gas_estimate: Mutex<Option<SniperResult<U256>>>,
    nonce: AtomicU64,
    receipt_statuses: Mutex<VecDeque<u64>>,
    receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    sent: Mutex<Vec<TypedTransaction>>,
    send_error: Mutex<Option<SniperError>>,
    get_logs_failures: AtomicU32,
    timestamp_failures: AtomicU32,
    get_logs_calls: AtomicU32,
    subscriptions: AtomicBool,
    live_tx: Mutex<Option<mpsc::Sender<Log>>>,
}

impl MockProvider {
    pub fn new(head: u64) -> Self {
        let mock = Self::default();
        mock.head.store(head, Ordering::SeqCst);
        mock
    }

    pub fn with_subscriptions(head: u64) -> Self {
        let mock = Self::new(head);
        mock.subscriptions.store(true, Ordering::SeqCst);
        mock
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Answers calls with this selector, optionally only for one contract.
    pub fn respond(&self, to: Option<Address>, signature: &str, response: SniperResult<Bytes>) {
        self.responses
            .lock()
            .unwrap()
            .insert((to, selector(signature)), response);
    }

    pub fn set_gas_estimate(&self, estimate: SniperResult<U256>) {
        *self.gas_estimate.lock().unwrap() = Some(estimate);
    }

    /// Status for the next submitted transaction's receipt (1 = success).
    pub fn queue_receipt_status(&self, status: u64) {
        self.receipt_statuses.lock().unwrap().push_back(status);
    }

    pub fn fail_next_send(&self, error: SniperError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_get_logs(&self, times: u32) {
        self.get_logs_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_next_block_timestamp(&self, times: u32) {
        self.timestamp_failures.store(times, Ordering::SeqCst);
    }

    pub fn get_logs_calls(&self) -> u32 {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    pub fn sent_transactions(&self) -> Vec<TypedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    /// Delivers a log to the open push subscription, if any.
    pub async fn emit_live(&self, log: Log) -> bool {
        let tx = self.live_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(log).await.is_ok(),
            None => false,
        }
    }

    /// Ends the push stream as if the node dropped it.
    pub fn drop_subscription(&self) {
        self.live_tx.lock().unwrap().take();
    }

    pub fn has_subscription(&self) -> bool {
        self.live_tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    async fn block_number(&self) -> SniperResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &Filter) -> SniperResult<Vec<Log>> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.get_logs_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.get_logs_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SniperError::CallReverted("scripted get_logs failure".to_string()));
        }

        let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
        let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> SniperResult<u64> {
        let remaining = self.timestamp_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.timestamp_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SniperError::TransientProvider("scripted block lookup failure".to_string()));
        }
        Ok(GENESIS_TIMESTAMP + number * 12)
    }

    async fn call(&self, tx: &TypedTransaction) -> SniperResult<Bytes> {
        let data = tx.data().cloned().unwrap_or_default();
        if data.len() < 4 {
            return Err(SniperError::CallReverted("empty calldata".to_string()));
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&data[..4]);
        let to = tx.to_addr().copied();

        let responses = self.responses.lock().unwrap();
        responses
            .get(&(to, sel))
            .or_else(|| responses.get(&(None, sel)))
            .cloned()
            .unwrap_or_else(|| Err(SniperError::CallReverted(format!("no scripted response for {:?}", sel))))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> SniperResult<U256> {
        self.gas_estimate
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(U256::from(200_000u64)))
    }

    async fn gas_price(&self) -> SniperResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn transaction_count(&self, _address: Address) -> SniperResult<U256> {
        Ok(U256::from(self.nonce.load(Ordering::SeqCst)))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> SniperResult<H256> {
        if let Some(error) = self.send_error.lock().unwrap().take() {
            return Err(error);
        }
        let rlp = ethers::utils::rlp::Rlp::new(raw.as_ref());
        let (tx, _signature) = TypedTransaction::decode_signed(&rlp)
            .map_err(|e| SniperError::SubmissionFailed(format!("undecodable transaction: {}", e)))?;

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let hash = H256::from_low_u64_be(0xabc0_0000 + nonce);
        let status = self.receipt_statuses.lock().unwrap().pop_front().unwrap_or(1);
        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(self.head.load(Ordering::SeqCst))),
            status: Some(U64::from(status)),
            ..Default::default()
        };
        self.receipts.lock().unwrap().insert(hash, receipt);
        self.sent.lock().unwrap().push(tx);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: H256) -> SniperResult<Option<TransactionReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    fn supports_subscriptions(&self) -> bool {
        self.subscriptions.load(Ordering::SeqCst)
    }

    async fn subscribe_logs(&self, _filter: &Filter) -> SniperResult<LogSubscription> {
        if !self.supports_subscriptions() {
            return Err(SniperError::TransientProvider("subscriptions disabled".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        *self.live_tx.lock().unwrap() = Some(tx);
        Ok(LogSubscription::new(rx, shutdown_tx))
    }
}

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, TransactionReceipt, TransactionRequest, H256,
    U256,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::contracts::{decode_output, encode_call, ERC20, ROUTER};
use crate::chain::{receipt_succeeded, ChainProvider, Wallet};
use crate::config::SniperConfig;
use crate::error::{SniperError, SniperResult};
use crate::models::token::{decimal_to_units, units_to_decimal};
use crate::models::TokenMetadata;
use crate::trading::monitor::PriceSource;

/// Native coin / wrapped base token decimals.
pub const BASE_DECIMALS: u8 = 18;
pub const SWAP_DEADLINE_SECS: i64 = 300;
/// Largest `decimals()` whose whole-token unit (`10^decimals`) fits in a U256.
pub const MAX_TOKEN_DECIMALS: u8 = 77;
const BPS_DENOMINATOR: u64 = 10_000;

/// Lower bound on output after slippage: `expected * (10000 - bps) / 10000`
/// with `bps = round(slippage_percent * 100)`.
pub fn min_out(expected: U256, slippage_percent: Decimal) -> U256 {
    let bps = (slippage_percent * Decimal::ONE_HUNDRED)
        .round()
        .to_u64()
        .unwrap_or(0)
        .min(BPS_DENOMINATOR);
    if bps == 0 {
        return expected;
    }
    let keep = U256::from(BPS_DENOMINATOR - bps);
    let denominator = U256::from(BPS_DENOMINATOR);
    match expected.checked_mul(keep) {
        Some(scaled) => scaled / denominator,
        None => expected / denominator * keep,
    }
}

/// `floor(estimate * multiplier)`, with the multiplier taken to 4 places.
pub fn gas_limit(estimate: U256, multiplier: Decimal) -> U256 {
    let scaled = (multiplier * Decimal::from(BPS_DENOMINATOR))
        .floor()
        .to_u64()
        .unwrap_or(BPS_DENOMINATOR)
        .max(BPS_DENOMINATOR);
    let denominator = U256::from(BPS_DENOMINATOR);
    match estimate.checked_mul(U256::from(scaled)) {
        Some(product) => product / denominator,
        None => estimate / denominator * U256::from(scaled),
    }
}

fn deadline() -> U256 {
    U256::from((Utc::now().timestamp() + SWAP_DEADLINE_SECS).max(0) as u64)
}

// ============================================================================
// QUOTER
// ============================================================================

/// Read-only router and token queries.
pub struct Quoter {
    provider: Arc<dyn ChainProvider>,
    router: Address,
    base_token: Address,
}

impl Quoter {
    pub fn new(provider: Arc<dyn ChainProvider>, router: Address, base_token: Address) -> Self {
        Self {
            provider,
            router,
            base_token,
        }
    }

    pub fn base_token(&self) -> Address {
        self.base_token
    }

    pub fn buy_path(&self, token: Address) -> Vec<Address> {
        vec![self.base_token, token]
    }

    pub fn sell_path(&self, token: Address) -> Vec<Address> {
        vec![token, self.base_token]
    }

    async fn read(&self, to: Address, data: ethers::types::Bytes) -> SniperResult<ethers::types::Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx).await
    }

    /// Expected output of swapping `amount_in` along `path`.
    pub async fn quote(&self, amount_in: U256, path: Vec<Address>) -> SniperResult<U256> {
        let data = encode_call(&ROUTER, "getAmountsOut", (amount_in, path.clone()))?;
        let output = self.read(self.router, data).await.map_err(|e| match e {
            SniperError::TransientProvider(_) => e,
            other => SniperError::QuoteUnavailable(other.to_string()),
        })?;
        let amounts: Vec<U256> = decode_output(&ROUTER, "getAmountsOut", &output)
            .map_err(|e| SniperError::QuoteUnavailable(e.to_string()))?;
        match amounts.last() {
            Some(out) if !out.is_zero() => Ok(*out),
            _ => Err(SniperError::QuoteUnavailable(format!("no output for path {:?}", path))),
        }
    }

    /// Base units received for one whole token.
    pub async fn price_of(&self, token: Address, decimals: u8) -> SniperResult<Decimal> {
        let one_token = U256::from(10u64)
            .checked_pow(U256::from(decimals))
            .ok_or_else(|| SniperError::QuoteUnavailable(format!("{:?} has {} decimals", token, decimals)))?;
        let out = self.quote(one_token, self.sell_path(token)).await?;
        units_to_decimal(out, BASE_DECIMALS)
            .ok_or_else(|| SniperError::QuoteUnavailable(format!("price of {:?} out of range", token)))
    }

    /// Best-effort ERC-20 metadata; any failed read yields the unknown sentinel.
    pub async fn token_metadata(&self, token: Address) -> TokenMetadata {
        let name = self.read_erc20::<String>(token, "name").await;
        let symbol = self.read_erc20::<String>(token, "symbol").await;
        let decimals = self.read_erc20::<u8>(token, "decimals").await;
        match (name, symbol, decimals) {
            (Ok(name), Ok(symbol), Ok(decimals)) if decimals <= MAX_TOKEN_DECIMALS => TokenMetadata {
                address: token,
                name,
                symbol,
                decimals,
            },
            _ => {
                warn!("Could not read metadata for token {:?}, using placeholder", token);
                TokenMetadata::unknown(token)
            }
        }
    }

    async fn read_erc20<T: ethers::abi::Detokenize>(&self, token: Address, function: &str) -> SniperResult<T> {
        let data = encode_call(&ERC20, function, ())?;
        let output = self.read(token, data).await?;
        decode_output(&ERC20, function, &output)
    }

    pub async fn balance_of(&self, token: Address, owner: Address) -> SniperResult<U256> {
        let data = encode_call(&ERC20, "balanceOf", owner)?;
        let output = self.read(token, data).await?;
        decode_output(&ERC20, "balanceOf", &output)
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> SniperResult<U256> {
        let data = encode_call(&ERC20, "allowance", (owner, spender))?;
        let output = self.read(token, data).await?;
        decode_output(&ERC20, "allowance", &output)
    }
}

#[async_trait]
impl PriceSource for Quoter {
    async fn token_price(&self, token: Address, decimals: u8) -> SniperResult<Decimal> {
        self.price_of(token, decimals).await
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// A submitted, not yet confirmed swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwap {
    pub tx_hash: H256,
    pub expected_out: U256,
    pub min_out: U256,
}

/// Builds, signs and submits router swaps. The only holder of the wallet.
pub struct SwapExecutor {
    provider: Arc<dyn ChainProvider>,
    quoter: Arc<Quoter>,
    wallet: Wallet,
    router: Address,
    confirmation_timeout: Duration,
    // Held from nonce lookup through submission.
    nonce_lock: Mutex<()>,
}

impl SwapExecutor {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        quoter: Arc<Quoter>,
        wallet: Wallet,
        router: Address,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            quoter,
            wallet,
            router,
            confirmation_timeout,
            nonce_lock: Mutex::new(()),
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn quoter(&self) -> &Arc<Quoter> {
        &self.quoter
    }

    /// Swaps `amount_in` of the native coin for `token`.
    pub async fn buy(&self, token: Address, amount_in: U256, config: &SniperConfig) -> SniperResult<PendingSwap> {
        let path = self.quoter.buy_path(token);
        let expected_out = self.quoter.quote(amount_in, path.clone()).await?;
        let min_out = min_out(expected_out, config.slippage_percent);

        let data = encode_call(
            &ROUTER,
            "swapExactETHForTokensSupportingFeeOnTransferTokens",
            (min_out, path, self.address(), deadline()),
        )?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.address())
            .to(self.router)
            .value(amount_in)
            .data(data)
            .into();

        info!(
            "Buying {:?}: {} wei in, expecting {} (min {})",
            token, amount_in, expected_out, min_out
        );
        let tx_hash = self.submit(tx, config).await?;
        Ok(PendingSwap {
            tx_hash,
            expected_out,
            min_out,
        })
    }

    /// Swaps `amount` of `token` back to the native coin, approving the
    /// router first if needed.
    pub async fn sell(
        &self,
        token: Address,
        amount: U256,
        slippage_percent: Decimal,
        config: &SniperConfig,
    ) -> SniperResult<PendingSwap> {
        self.ensure_allowance(token, amount, config).await?;

        let path = self.quoter.sell_path(token);
        let expected_out = self.quoter.quote(amount, path.clone()).await?;
        let min_out = min_out(expected_out, slippage_percent);

        let data = encode_call(
            &ROUTER,
            "swapExactTokensForETHSupportingFeeOnTransferTokens",
            (amount, min_out, path, self.address(), deadline()),
        )?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.address())
            .to(self.router)
            .data(data)
            .into();

        info!(
            "Selling {} units of {:?}, expecting {} wei (min {})",
            amount, token, expected_out, min_out
        );
        let tx_hash = self.submit(tx, config).await?;
        Ok(PendingSwap {
            tx_hash,
            expected_out,
            min_out,
        })
    }

    /// Approves the router for an unlimited amount when the current
    /// allowance does not cover `amount`, and waits for that approval.
    pub async fn ensure_allowance(&self, token: Address, amount: U256, config: &SniperConfig) -> SniperResult<()> {
        let current = self.quoter.allowance(token, self.address(), self.router).await?;
        if current >= amount {
            debug!("Allowance for {:?} already sufficient ({})", token, current);
            return Ok(());
        }

        info!("Approving router for token {:?}", token);
        let data = encode_call(&ERC20, "approve", (self.router, U256::MAX))?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.address())
            .to(token)
            .data(data)
            .into();
        let hash = self.submit(tx, config).await?;
        match self.confirm(hash).await {
            Ok(_) => Ok(()),
            Err(SniperError::ConfirmationFailed(hash)) => Err(SniperError::InsufficientAllowance(format!(
                "approval {} reverted",
                hash
            ))),
            Err(e) => Err(e),
        }
    }

    /// Estimates gas, fills nonce/price/chain id, signs and sends.
    async fn submit(&self, mut tx: TypedTransaction, config: &SniperConfig) -> SniperResult<H256> {
        let estimate = self.provider.estimate_gas(&tx).await.map_err(|e| match e {
            SniperError::InsufficientFunds(_) => e,
            other => SniperError::GasEstimationFailed(other.to_string()),
        })?;
        tx.set_gas(gas_limit(estimate, config.gas_limit_multiplier));

        let gas_price = match config.gas_price_override {
            Some(gwei) => decimal_to_units(gwei, 9)
                .ok_or_else(|| SniperError::InvalidConfig(format!("bad gas price override {}", gwei)))?,
            None => self.provider.gas_price().await?,
        };
        tx.set_gas_price(gas_price);
        tx.set_chain_id(self.wallet.chain_id());

        let _guard = self.nonce_lock.lock().await;
        let nonce = self.provider.transaction_count(self.address()).await?;
        tx.set_nonce(nonce);

        let raw = self.wallet.sign_transaction(&tx)?;
        let hash = self.provider.send_raw_transaction(raw).await?;
        info!("Submitted transaction {:?} (nonce {})", hash, nonce);
        Ok(hash)
    }

    /// Waits for one confirmation. A reverted receipt is a failure.
    pub async fn confirm(&self, hash: H256) -> SniperResult<TransactionReceipt> {
        let receipt = self
            .provider
            .wait_for_confirmation(hash, 1, self.confirmation_timeout)
            .await?;
        if receipt_succeeded(&receipt) {
            Ok(receipt)
        } else {
            warn!("Transaction {:?} reverted", hash);
            Err(SniperError::ConfirmationFailed(format!("{:?}", hash)))
        }
    }
}

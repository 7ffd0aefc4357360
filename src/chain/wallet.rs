use ethers::signers::{LocalWallet, Signer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes};
use tracing::{error, info};

use crate::error::{SniperError, SniperResult};

/// Signing credential for the trading account. Only the swap executor
/// holds one.
#[derive(Clone, Debug)]
pub struct Wallet {
    signer: LocalWallet,
}

impl Wallet {
    /// Builds a wallet from a hex private key, with or without `0x`.
    pub fn from_private_key(private_key: &str, chain_id: u64) -> SniperResult<Self> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer = key.parse::<LocalWallet>().map_err(|e| {
            error!("Failed to parse private key: {}", e);
            SniperError::Wallet(format!("Invalid private key: {}", e))
        })?;
        let signer = signer.with_chain_id(chain_id);

        info!("Wallet initialized. Address: {:?}, chain id: {}", signer.address(), chain_id);
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.signer.chain_id()
    }

    /// Signs a fully populated transaction and returns its raw RLP encoding.
    pub fn sign_transaction(&self, tx: &TypedTransaction) -> SniperResult<Bytes> {
        let signature = self
            .signer
            .sign_transaction_sync(tx)
            .map_err(|e| SniperError::Wallet(format!("Failed to sign transaction: {}", e)))?;
        Ok(tx.rlp_signed(&signature))
    }
}

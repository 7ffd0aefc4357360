use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::token::u256_dec;

/// Which factory generation emitted a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoryVersion {
    V2, // PairCreated(address,address,address,uint256)
    V3, // PoolCreated(address,address,uint24,int24,address)
}

impl std::fmt::Display for FactoryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V2 => write!(f, "v2"),
            Self::V3 => write!(f, "v3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairCreatedEvent {
    pub token0: Address,
    pub token1: Address,
    pub pair_address: Address,
    pub block_number: u64,
    pub tx_hash: H256,
    pub timestamp: DateTime<Utc>,
    pub factory_version: FactoryVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintEvent {
    pub token_address: Address,
    pub recipient: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub block_number: u64,
    pub tx_hash: H256,
    pub timestamp: DateTime<Utc>,
    pub log_index: u64,
}

/// Normalized on-chain event emitted by the watchers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainEvent {
    PairCreated(PairCreatedEvent),
    Mint(MintEvent),
}

impl ChainEvent {
    pub fn block_number(&self) -> u64 {
        match self {
            Self::PairCreated(e) => e.block_number,
            Self::Mint(e) => e.block_number,
        }
    }

    pub fn tx_hash(&self) -> H256 {
        match self {
            Self::PairCreated(e) => e.tx_hash,
            Self::Mint(e) => e.tx_hash,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PairCreated(e) => e.timestamp,
            Self::Mint(e) => e.timestamp,
        }
    }

    /// Token this event would have us buy, if any.
    ///
    /// * Mints qualify when they land on the launch contract.
    /// * Pairs qualify when one side is the base token; if a launch contract
    ///   is configured the other side must be that contract.
    pub fn snipe_target(&self, launch_contract: Option<Address>, base_token: Address) -> Option<Address> {
        match self {
            Self::Mint(e) => match launch_contract {
                Some(launch) if e.recipient == launch => Some(e.token_address),
                _ => None,
            },
            Self::PairCreated(e) => {
                let other = if e.token0 == base_token {
                    e.token1
                } else if e.token1 == base_token {
                    e.token0
                } else {
                    return None;
                };
                match launch_contract {
                    Some(launch) if launch != other => None,
                    _ => Some(other),
                }
            }
        }
    }
}

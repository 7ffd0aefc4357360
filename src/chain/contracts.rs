//! ABI bindings for the router and ERC-20 calls we make, plus decoding of
//! the factory and transfer logs the watchers consume.

use chrono::{DateTime, Utc};
use ethers::abi::{parse_abi, Detokenize, Tokenize};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use thiserror::Error;

use crate::error::{SniperError, SniperResult};
use crate::models::{ChainEvent, FactoryVersion, MintEvent, PairCreatedEvent};

pub const PAIR_CREATED_V2_SIG: &str = "PairCreated(address,address,address,uint256)";
pub const POOL_CREATED_V3_SIG: &str = "PoolCreated(address,address,uint24,int24,address)";
pub const TRANSFER_SIG: &str = "Transfer(address,address,uint256)";

lazy_static! {
    pub static ref ROUTER: BaseContract = BaseContract::from(
        parse_abi(&[
            "function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)",
            "function swapExactETHForTokensSupportingFeeOnTransferTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) external payable",
            "function swapExactTokensForETHSupportingFeeOnTransferTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external",
        ])
        .expect("router ABI is valid")
    );

    pub static ref ERC20: BaseContract = BaseContract::from(
        parse_abi(&[
            "function name() external view returns (string)",
            "function symbol() external view returns (string)",
            "function decimals() external view returns (uint8)",
            "function balanceOf(address owner) external view returns (uint256)",
            "function allowance(address owner, address spender) external view returns (uint256)",
            "function approve(address spender, uint256 amount) external returns (bool)",
        ])
        .expect("ERC-20 ABI is valid")
    );

    pub static ref PAIR_CREATED_V2: H256 = H256::from(keccak256(PAIR_CREATED_V2_SIG.as_bytes()));
    pub static ref POOL_CREATED_V3: H256 = H256::from(keccak256(POOL_CREATED_V3_SIG.as_bytes()));
    pub static ref TRANSFER: H256 = H256::from(keccak256(TRANSFER_SIG.as_bytes()));
}

/// Left-pads an address into a 32-byte topic.
pub fn address_topic(address: Address) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    H256::from(bytes)
}

pub fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

pub fn encode_call<T: Tokenize>(contract: &BaseContract, function: &str, args: T) -> SniperResult<Bytes> {
    contract
        .encode(function, args)
        .map_err(|e| SniperError::CallReverted(format!("failed to encode {}: {}", function, e)))
}

pub fn decode_output<D: Detokenize>(contract: &BaseContract, function: &str, data: &Bytes) -> SniperResult<D> {
    contract
        .decode_output(function, data)
        .map_err(|e| SniperError::CallReverted(format!("unexpected {} output: {}", function, e)))
}

/// Logs emitted by any of the given factories for either pool generation.
pub fn pair_filter(factories: &[Address]) -> Filter {
    Filter::new()
        .address(factories.to_vec())
        .topic0(vec![*PAIR_CREATED_V2, *POOL_CREATED_V3])
}

/// ERC-20 transfers out of the zero address, optionally narrowed to one
/// token contract and one recipient.
pub fn mint_filter(token: Option<Address>, recipient: Option<Address>) -> Filter {
    let mut filter = Filter::new()
        .topic0(*TRANSFER)
        .topic1(address_topic(Address::zero()));
    if let Some(token) = token {
        filter = filter.address(token);
    }
    if let Some(recipient) = recipient {
        filter = filter.topic2(address_topic(recipient));
    }
    filter
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log is missing {0}")]
    MissingField(&'static str),
    #[error("unrecognized event topic {0:?}")]
    UnknownTopic(H256),
    #[error("transfer is not a mint")]
    NotAMint,
    #[error("log data too short: {0} bytes")]
    ShortData(usize),
}

/// Event payload decoded from a log, before its block timestamp is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLog {
    Pair {
        token0: Address,
        token1: Address,
        pair_address: Address,
        version: FactoryVersion,
    },
    Mint {
        token_address: Address,
        recipient: Address,
        amount: U256,
    },
}

/// Where a log sits on chain. Used for ordering and for stamping events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

impl LogPosition {
    pub fn of(log: &Log) -> Result<Self, DecodeError> {
        Ok(Self {
            block_number: log
                .block_number
                .ok_or(DecodeError::MissingField("block number"))?
                .as_u64(),
            log_index: log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
            tx_hash: log
                .transaction_hash
                .ok_or(DecodeError::MissingField("transaction hash"))?,
        })
    }
}

fn topic(log: &Log, index: usize) -> Result<&H256, DecodeError> {
    log.topics.get(index).ok_or(DecodeError::MissingField("topic"))
}

fn word(data: &[u8], index: usize) -> Result<&[u8], DecodeError> {
    data.get(index * 32..(index + 1) * 32)
        .ok_or(DecodeError::ShortData(data.len()))
}

pub fn decode_log(log: &Log) -> Result<DecodedLog, DecodeError> {
    let topic0 = *topic(log, 0)?;

    if topic0 == *PAIR_CREATED_V2 {
        // data: pair address, pair count
        let pair = word(&log.data, 0)?;
        Ok(DecodedLog::Pair {
            token0: topic_address(topic(log, 1)?),
            token1: topic_address(topic(log, 2)?),
            pair_address: Address::from_slice(&pair[12..]),
            version: FactoryVersion::V2,
        })
    } else if topic0 == *POOL_CREATED_V3 {
        // data: tick spacing, pool address
        let pool = word(&log.data, 1)?;
        Ok(DecodedLog::Pair {
            token0: topic_address(topic(log, 1)?),
            token1: topic_address(topic(log, 2)?),
            pair_address: Address::from_slice(&pool[12..]),
            version: FactoryVersion::V3,
        })
    } else if topic0 == *TRANSFER {
        if topic_address(topic(log, 1)?) != Address::zero() {
            return Err(DecodeError::NotAMint);
        }
        Ok(DecodedLog::Mint {
            token_address: log.address,
            recipient: topic_address(topic(log, 2)?),
            amount: U256::from_big_endian(word(&log.data, 0)?),
        })
    } else {
        Err(DecodeError::UnknownTopic(topic0))
    }
}

impl DecodedLog {
    pub fn involves(&self, token: Address) -> bool {
        match self {
            Self::Pair { token0, token1, .. } => *token0 == token || *token1 == token,
            Self::Mint { recipient, .. } => *recipient == token,
        }
    }

    pub fn into_event(self, position: LogPosition, timestamp: DateTime<Utc>) -> ChainEvent {
        match self {
            Self::Pair { token0, token1, pair_address, version } => {
                ChainEvent::PairCreated(PairCreatedEvent {
                    token0,
                    token1,
                    pair_address,
                    block_number: position.block_number,
                    tx_hash: position.tx_hash,
                    timestamp,
                    factory_version: version,
                })
            }
            Self::Mint { token_address, recipient, amount } => ChainEvent::Mint(MintEvent {
                token_address,
                recipient,
                amount,
                block_number: position.block_number,
                tx_hash: position.tx_hash,
                timestamp,
                log_index: position.log_index,
            }),
        }
    }
}

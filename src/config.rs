use anyhow::{Context, Result};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{SniperError, SniperResult};
use crate::models::FactoryVersion;

/// Operator-tunable trading parameters. Mutable at runtime.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SniperConfig {
    pub auto_buy_enabled: bool,
    pub buy_amount_base: Decimal,               // Native coin spent per snipe
    pub slippage_percent: Decimal,              // [0, 100)
    pub gas_limit_multiplier: Decimal,          // >= 1
    pub gas_price_override: Option<Decimal>,    // gwei; None leaves it to the network
    pub auto_sell_enabled: bool,
    pub take_profit_percent: Option<Decimal>,
    pub stop_loss_percent: Option<Decimal>,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            auto_buy_enabled: false,
            buy_amount_base: Decimal::new(1, 2), // 0.01
            slippage_percent: Decimal::from(10),
            gas_limit_multiplier: Decimal::new(12, 1), // 1.2
            gas_price_override: None,
            auto_sell_enabled: false,
            take_profit_percent: Some(Decimal::from(100)),
            stop_loss_percent: Some(Decimal::from(50)),
        }
    }
}

impl SniperConfig {
    pub fn validate(&self) -> SniperResult<()> {
        if self.slippage_percent < Decimal::ZERO || self.slippage_percent >= Decimal::ONE_HUNDRED {
            return Err(SniperError::InvalidConfig(format!(
                "slippagePercent must be in [0, 100), got {}",
                self.slippage_percent
            )));
        }
        if self.gas_limit_multiplier < Decimal::ONE {
            return Err(SniperError::InvalidConfig(format!(
                "gasLimitMultiplier must be >= 1, got {}",
                self.gas_limit_multiplier
            )));
        }
        if self.buy_amount_base <= Decimal::ZERO {
            return Err(SniperError::InvalidConfig(format!(
                "buyAmountBase must be positive, got {}",
                self.buy_amount_base
            )));
        }
        if let Some(gas_price) = self.gas_price_override {
            if gas_price <= Decimal::ZERO {
                return Err(SniperError::InvalidConfig(format!(
                    "gasPriceOverride must be positive, got {}",
                    gas_price
                )));
            }
        }
        if let Some(tp) = self.take_profit_percent {
            if tp <= Decimal::ZERO {
                return Err(SniperError::InvalidConfig(format!(
                    "takeProfitPercent must be positive, got {}",
                    tp
                )));
            }
        }
        if let Some(sl) = self.stop_loss_percent {
            if sl <= Decimal::ZERO || sl >= Decimal::ONE_HUNDRED {
                return Err(SniperError::InvalidConfig(format!(
                    "stopLossPercent must be in (0, 100), got {}",
                    sl
                )));
            }
        }
        Ok(())
    }
}

/// A factory contract the pair watcher listens to.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FactoryConfig {
    pub address: Address,
    pub version: FactoryVersion,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: Option<String>,          // Enables push subscriptions when set
    pub private_key: Option<String>,     // Without it the engine stays uninitialized
    pub chain_id: u64,

    pub router_address: Address,
    pub base_token_address: Address,     // Wrapped native coin (WETH-equivalent)
    pub factories: Vec<FactoryConfig>,
    pub launch_contract: Option<Address>,
    pub mint_watch_address: Option<Address>,

    pub watch_poll_interval_ms: u64,
    pub history_blocks: u64,
    pub max_block_range: u64,
    pub price_poll_interval_secs: u64,
    pub confirmation_timeout_secs: u64,

    pub data_dir: PathBuf,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,

    pub sniper: SniperConfig,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to parse {}", key)),
        _ => Ok(default),
    }
}

fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to parse {}", key)),
        _ => Ok(None),
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.trim().to_lowercase() == "true")
        .unwrap_or(default)
}

/// Parses `FACTORIES` as a comma separated list of `address[:version]`.
fn parse_factories(raw: &str) -> Result<Vec<FactoryConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (address, version) = match entry.split_once(':') {
                Some((a, v)) => (a, v),
                None => (entry, "v2"),
            };
            let version = match version.to_lowercase().as_str() {
                "v2" => FactoryVersion::V2,
                "v3" => FactoryVersion::V3,
                other => anyhow::bail!("Unknown factory version '{}' in FACTORIES", other),
            };
            let address = Address::from_str(address)
                .with_context(|| format!("Invalid factory address '{}'", address))?;
            Ok(FactoryConfig { address, version })
        })
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = SniperConfig::default();
        let sniper = SniperConfig {
            auto_buy_enabled: parse_bool_env("AUTO_BUY_ENABLED", defaults.auto_buy_enabled),
            buy_amount_base: parse_env("BUY_AMOUNT_BASE", defaults.buy_amount_base)?,
            slippage_percent: parse_env("SLIPPAGE_PERCENT", defaults.slippage_percent)?,
            gas_limit_multiplier: parse_env("GAS_LIMIT_MULTIPLIER", defaults.gas_limit_multiplier)?,
            gas_price_override: parse_optional_env("GAS_PRICE_GWEI")?,
            auto_sell_enabled: parse_bool_env("AUTO_SELL_ENABLED", defaults.auto_sell_enabled),
            take_profit_percent: parse_optional_env("TAKE_PROFIT_PERCENT")?
                .or(defaults.take_profit_percent),
            stop_loss_percent: parse_optional_env("STOP_LOSS_PERCENT")?
                .or(defaults.stop_loss_percent),
        };
        sniper.validate().context("Invalid sniper configuration")?;

        let factories = match env::var("FACTORIES") {
            Ok(raw) => parse_factories(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            rpc_url: env::var("RPC_URL").context("RPC_URL not set in environment")?,
            ws_url: env::var("WS_URL").ok().filter(|s| !s.trim().is_empty()),
            private_key: env::var("PRIVATE_KEY").ok().filter(|s| !s.trim().is_empty()),
            chain_id: parse_env("CHAIN_ID", 1u64)?,

            router_address: env::var("ROUTER_ADDRESS")
                .context("ROUTER_ADDRESS not set in environment")?
                .parse()
                .context("Failed to parse ROUTER_ADDRESS")?,
            base_token_address: env::var("BASE_TOKEN_ADDRESS")
                .context("BASE_TOKEN_ADDRESS not set in environment")?
                .parse()
                .context("Failed to parse BASE_TOKEN_ADDRESS")?,
            factories,
            launch_contract: parse_optional_env("LAUNCH_CONTRACT")?,
            mint_watch_address: parse_optional_env("MINT_WATCH_ADDRESS")?,

            watch_poll_interval_ms: parse_env("WATCH_POLL_INTERVAL_MS", 4_000u64)?,
            history_blocks: parse_env("HISTORY_BLOCKS", 1_000u64)?,
            max_block_range: parse_env("MAX_BLOCK_RANGE", 2_000u64)?,
            price_poll_interval_secs: parse_env("PRICE_POLL_INTERVAL_SECS", 10u64)?,
            confirmation_timeout_secs: parse_env("CONFIRMATION_TIMEOUT_SECS", 120u64)?,

            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            api_host: env::var("API_HOST").ok(),
            api_port: parse_optional_env("API_PORT")?,

            sniper,
        })
    }
}

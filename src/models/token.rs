use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";
pub const UNKNOWN_NAME: &str = "Unknown Token";
pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub address: Address,  // ERC-20 contract address
    pub name: String,      // Token name
    pub symbol: String,    // Token symbol
    pub decimals: u8,      // Token decimals (usually 18)
}

impl TokenMetadata {
    /// Placeholder used when the token contract does not answer the
    /// metadata calls. Snipes proceed with it instead of aborting.
    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            name: UNKNOWN_NAME.to_string(),
            symbol: UNKNOWN_SYMBOL.to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.symbol == UNKNOWN_SYMBOL && self.name == UNKNOWN_NAME
    }
}

/// Latest known price for a tracked token. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub token_address: Address,
    pub price_base: Decimal,
    pub timestamp: DateTime<Utc>,
}

// Decimal carries 28 significant digits; longer fractions are truncated.
const DECIMAL_MAX_DIGITS: usize = 28;

/// Converts a raw on-chain amount into a decimal in whole units.
/// Returns `None` when the integer part alone does not fit in a `Decimal`.
pub fn units_to_decimal(amount: U256, decimals: u8) -> Option<Decimal> {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    if int_part.len() > DECIMAL_MAX_DIGITS {
        return None;
    }
    let frac_budget = DECIMAL_MAX_DIGITS - int_part.len();
    let frac = frac_part[..frac_part.len().min(frac_budget)].trim_end_matches('0');
    let text = if frac.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac)
    };
    Decimal::from_str(&text).ok()
}

/// Converts a decimal amount of whole units into raw on-chain units,
/// truncating anything below the smallest unit.
pub fn decimal_to_units(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let truncated = amount
        .round_dp_with_strategy(decimals as u32, RoundingStrategy::ToZero)
        .normalize();
    let text = truncated.to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (text.clone(), String::new()),
    };
    let padded = format!("{}{:0<width$}", int_part, frac_part, width = decimals as usize);
    U256::from_dec_str(&padded).ok()
}

/// Serde adapter that stores `U256` as a base-10 string instead of ethers'
/// default hex encoding.
pub mod u256_dec {
    use ethers::types::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let text = String::deserialize(deserializer)?;
        U256::from_dec_str(&text).map_err(D::Error::custom)
    }

    pub mod option {
        use ethers::types::U256;
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            text.map(|t| U256::from_dec_str(&t).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    #[test]
    fn test_units_to_decimal() {
        let one_and_half = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(units_to_decimal(one_and_half, 18), Some(dec("1.5")));
        assert_eq!(units_to_decimal(U256::from(42u64), 0), Some(dec("42")));
    }

    #[test]
    fn test_units_to_decimal_large_supply() {
        // 10^12 tokens with 18 decimals has 31 digits; the fraction is zero
        // so nothing meaningful is lost.
        let supply = U256::exp10(30);
        assert_eq!(units_to_decimal(supply, 18), Some(Decimal::from(1_000_000_000_000u64)));
    }

    #[test]
    fn test_decimal_to_units() {
        assert_eq!(
            decimal_to_units(dec("0.05"), 18),
            Some(U256::from(50_000_000_000_000_000u64))
        );
        assert_eq!(decimal_to_units(dec("3"), 6), Some(U256::from(3_000_000u64)));
        assert_eq!(decimal_to_units(dec("-1"), 18), None);
    }

    #[test]
    fn test_unknown_metadata_sentinel() {
        let meta = TokenMetadata::unknown(Address::zero());
        assert!(meta.is_unknown());
        assert_eq!(meta.decimals, 18);
    }
}

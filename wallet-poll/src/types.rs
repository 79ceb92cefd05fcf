use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PollError, Result};

/// Canonical Multicall3 deployment, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("ca11bde05977b3631167028862be2a173976ca11");

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// `None` for the chain's native asset.
    pub address: Option<Address>,
    pub coin_gecko_id: Option<String>,
}

/// Stable identity of a currency: `symbol` plus contract address, or plus name
/// for native assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyId(String);

impl Currency {
    pub fn native(name: &str, symbol: &str, decimals: u8, coin_gecko_id: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            address: None,
            coin_gecko_id: coin_gecko_id.map(str::to_string),
        }
    }

    pub fn erc20(
        name: &str,
        symbol: &str,
        decimals: u8,
        address: Address,
        coin_gecko_id: Option<&str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            address: Some(address),
            coin_gecko_id: coin_gecko_id.map(str::to_string),
        }
    }

    pub fn is_native(&self) -> bool {
        self.address.is_none()
    }

    pub fn id(&self) -> CurrencyId {
        match self.address {
            Some(address) => CurrencyId(format!("{}:{}", self.symbol, address)),
            None => CurrencyId(format!("{}:{}", self.symbol, self.name)),
        }
    }
}

impl CurrencyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: u64,
    pub name: String,
    pub native_currency: Currency,
    pub multicall_address: Address,
}

impl Network {
    pub fn new(chain_id: u64, name: &str, native_currency: Currency, multicall_address: Address) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            native_currency,
            multicall_address,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.chain_id)
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn parse_address(address: &str) -> Result<Address> {
    let trimmed = address.trim();
    Address::from_str(trimmed).map_err(|_| PollError::InvalidAddress(trimmed.to_string()))
}

pub fn parse_u256_hex(value: &str) -> Result<U256> {
    let trimmed = value.trim().trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(trimmed, 16)
        .map_err(|_| PollError::invalid_params(format!("Invalid hex U256: {value}")))
}

pub fn bytes_to_hex0x<B: AsRef<[u8]>>(bytes: B) -> String {
    format!("0x{}", hex::encode(bytes.as_ref()))
}

pub fn hex0x_to_bytes(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim().trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(trimmed).map_err(|err| PollError::invalid_params(format!("Invalid hex: {err}")))
}

pub fn format_units(value: &U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let raw = value.to_string();
    let decimals_usize = decimals as usize;
    if raw == "0" {
        return "0".to_string();
    }

    if raw.len() <= decimals_usize {
        let mut padded = String::with_capacity(decimals_usize + 2);
        padded.push_str("0.");
        for _ in 0..(decimals_usize - raw.len()) {
            padded.push('0');
        }
        padded.push_str(&raw);
        return trim_trailing_zeros(&padded);
    }

    let split = raw.len() - decimals_usize;
    let (int_part, frac_part) = raw.split_at(split);
    let formatted = format!("{int_part}.{frac_part}");
    trim_trailing_zeros(&formatted)
}

fn trim_trailing_zeros(value: &str) -> String {
    if let Some((int_part, frac_part)) = value.split_once('.') {
        let trimmed_frac = frac_part.trim_end_matches('0');
        if trimmed_frac.is_empty() {
            return int_part.to_string();
        }
        return format!("{int_part}.{trimmed_frac}");
    }
    value.to_string()
}

pub mod u256_as_string {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}

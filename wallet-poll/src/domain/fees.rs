use alloy_primitives::U256;
use serde::Serialize;

use crate::abi;
use crate::error::Result;
use crate::infra::multicall::{CallDescriptor, CallResult};
use crate::poll::request::{FnPollRequest, PollRequest, RequestMeta};
use crate::types::{self, Network};

/// Typical gas costs for common operations
const GAS_TRANSFER: u64 = 21_000;
const GAS_ERC20_TRANSFER: u64 = 65_000;
const GAS_APPROVE: u64 = 46_000;
const GAS_SWAP: u64 = 150_000;

const GWEI: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSpeed {
    Slow,
    Normal,
    Fast,
}

impl FeeSpeed {
    pub const ALL: [FeeSpeed; 3] = [FeeSpeed::Slow, FeeSpeed::Normal, FeeSpeed::Fast];

    /// Headroom over the current base fee, in percent.
    fn base_fee_percent(self) -> u64 {
        match self {
            FeeSpeed::Slow => 100,
            FeeSpeed::Normal => 125,
            FeeSpeed::Fast => 150,
        }
    }

    fn priority_fee(self) -> U256 {
        match self {
            FeeSpeed::Slow => U256::from(GWEI),
            FeeSpeed::Normal => U256::from(GWEI * 3 / 2),
            FeeSpeed::Fast => U256::from(GWEI * 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeTier {
    pub speed: FeeSpeed,
    #[serde(with = "types::u256_as_string")]
    pub max_fee_per_gas: U256,
    #[serde(with = "types::u256_as_string")]
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationCost {
    pub operation: &'static str,
    pub gas: u64,
    #[serde(with = "types::u256_as_string")]
    pub cost_wei: U256,
    pub cost_native: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    pub chain_id: u64,
    #[serde(with = "types::u256_as_string")]
    pub base_fee: U256,
    pub base_fee_gwei: String,
    pub tiers: Vec<FeeTier>,
    /// Priced at the normal tier.
    pub typical_costs: Vec<OperationCost>,
    pub updated_at_ms: i64,
}

impl FeeEstimate {
    pub fn from_base_fee(network: &Network, base_fee: U256) -> Self {
        let tiers: Vec<FeeTier> = FeeSpeed::ALL
            .iter()
            .map(|speed| FeeTier {
                speed: *speed,
                max_fee_per_gas: max_fee_per_gas(base_fee, *speed),
                max_priority_fee_per_gas: speed.priority_fee(),
            })
            .collect();

        let normal = max_fee_per_gas(base_fee, FeeSpeed::Normal);
        let decimals = network.native_currency.decimals;
        let typical_costs = [
            ("transfer", GAS_TRANSFER),
            ("erc20_transfer", GAS_ERC20_TRANSFER),
            ("approve", GAS_APPROVE),
            ("swap", GAS_SWAP),
        ]
        .into_iter()
        .map(|(operation, gas)| estimate_cost(operation, normal, gas, decimals))
        .collect();

        Self {
            chain_id: network.chain_id,
            base_fee,
            base_fee_gwei: types::format_units(&base_fee, 9),
            tiers,
            typical_costs,
            updated_at_ms: types::now_ms(),
        }
    }

    pub fn tier(&self, speed: FeeSpeed) -> Option<&FeeTier> {
        self.tiers.iter().find(|t| t.speed == speed)
    }
}

fn max_fee_per_gas(base_fee: U256, speed: FeeSpeed) -> U256 {
    let scaled = base_fee.saturating_mul(U256::from(speed.base_fee_percent())) / U256::from(100u64);
    scaled.saturating_add(speed.priority_fee())
}

fn estimate_cost(operation: &'static str, fee_per_gas: U256, gas: u64, decimals: u8) -> OperationCost {
    let cost_wei = fee_per_gas.saturating_mul(U256::from(gas));
    OperationCost {
        operation,
        gas,
        cost_wei,
        cost_native: types::format_units(&cost_wei, decimals),
    }
}

pub fn base_fee_call(network: &Network) -> CallDescriptor {
    CallDescriptor::from_sol_call(network.multicall_address, &abi::getBasefeeCall {})
}

pub fn fee_request<F>(network: &Network, on_fee: F) -> Box<dyn PollRequest>
where
    F: FnOnce(Result<FeeEstimate>) + Send + 'static,
{
    let network_for_handler = network.clone();
    Box::new(FnPollRequest::new(
        format!("basefee:{}", network.chain_id),
        base_fee_call(network),
        move |result: Result<&CallResult>, _: &RequestMeta| {
            let estimate = result
                .and_then(CallResult::decode_uint)
                .map(|base_fee| FeeEstimate::from_base_fee(&network_for_handler, base_fee));
            on_fee(estimate);
        },
    ))
}

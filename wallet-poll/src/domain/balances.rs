use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::abi;
use crate::error::Result;
use crate::infra::multicall::{CallDescriptor, CallResult};
use crate::poll::request::{FnPollRequest, PollRequest, RequestMeta};
use crate::types::{self, Currency, CurrencyId, Network};

/// Native balances go through the aggregator's own `getEthBalance`, so they
/// share the batch with token balances.
pub fn balance_call(network: &Network, wallet: Address, currency: &Currency) -> CallDescriptor {
    match currency.address {
        Some(token) => {
            CallDescriptor::from_sol_call(token, &abi::balanceOfCall { account: wallet })
        }
        None => CallDescriptor::from_sol_call(
            network.multicall_address,
            &abi::getEthBalanceCall { addr: wallet },
        ),
    }
}

pub fn decode_balance(result: Result<&CallResult>) -> Result<U256> {
    result?.decode_uint()
}

/// One request per currency so a failed chunk only costs the currencies in it.
pub fn balance_request<F>(
    network: &Network,
    wallet: Address,
    currency: &Currency,
    on_balance: F,
) -> Box<dyn PollRequest>
where
    F: FnOnce(CurrencyId, Result<U256>) + Send + 'static,
{
    let id = currency.id();
    let call = balance_call(network, wallet, currency);
    Box::new(FnPollRequest::new(
        format!("balance:{}:{}", network.chain_id, id),
        call,
        move |result: Result<&CallResult>, _: &RequestMeta| on_balance(id, decode_balance(result)),
    ))
}

/// A balance as handed to presenters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceEntry {
    pub currency: Currency,
    #[serde(with = "types::u256_as_string")]
    pub raw: U256,
    pub formatted: String,
}

impl BalanceEntry {
    pub fn new(currency: Currency, raw: U256) -> Self {
        let formatted = types::format_units(&raw, currency.decimals);
        Self {
            currency,
            raw,
            formatted,
        }
    }
}

use alloy_primitives::Address;
use alloy_sol_types::SolCall;

use crate::abi;
use crate::codec::{AbiType, AbiValue};
use crate::error::{PollError, Result};
use crate::infra::multicall::{CallDescriptor, CallResult};
use crate::poll::request::{GroupPollRequest, PollRequest, RequestMeta};
use crate::types::Currency;

pub fn metadata_calls(token: Address) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::new(token, abi::nameCall::SELECTOR.to_vec().into()),
        CallDescriptor::new(token, abi::symbolCall::SELECTOR.to_vec().into()),
        CallDescriptor::new(token, abi::decimalsCall::SELECTOR.to_vec().into()),
    ]
}

/// Builds a currency from `name()`, `symbol()` and `decimals()` results, in
/// that order. Every field is required.
pub fn decode_metadata(token: Address, results: &[CallResult]) -> Result<Currency> {
    let [name, symbol, decimals] = results else {
        return Err(PollError::decode(format!(
            "Expected 3 metadata results for {token}, got {}",
            results.len()
        )));
    };

    let name = decode_string(name)?;
    let symbol = decode_string(symbol)?;
    let decimals = decimals
        .decode(&[AbiType::Uint(8)])?
        .first()
        .and_then(AbiValue::as_uint)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| PollError::decode(format!("Bad decimals for {token}")))?;

    if symbol.trim().is_empty() {
        return Err(PollError::decode(format!("Empty symbol for {token}")));
    }

    Ok(Currency::erc20(name.trim(), symbol.trim(), decimals, token, None))
}

fn decode_string(result: &CallResult) -> Result<String> {
    result
        .decode(&[AbiType::String])?
        .first()
        .and_then(AbiValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| PollError::decode("Expected a string return value"))
}

pub fn metadata_request<F>(token: Address, on_currency: F) -> Box<dyn PollRequest>
where
    F: FnOnce(Result<Currency>) + Send + 'static,
{
    Box::new(GroupPollRequest::new(
        format!("metadata:{token}"),
        metadata_calls(token),
        move |results: Result<&[CallResult]>, _: &RequestMeta| {
            on_currency(results.and_then(|results| decode_metadata(token, results)));
        },
    ))
}

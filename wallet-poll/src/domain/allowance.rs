use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::abi;
use crate::error::Result;
use crate::infra::multicall::{CallDescriptor, CallResult};
use crate::poll::request::{FnPollRequest, PollRequest, RequestMeta};
use crate::types;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowanceQuery {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allowance {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "types::u256_as_string")]
    pub amount: U256,
    pub unlimited: bool,
}

impl Allowance {
    pub fn new(query: AllowanceQuery, amount: U256) -> Self {
        // Wallets approve either MAX or something close to it.
        let unlimited = amount >= U256::MAX >> 1usize;
        Self {
            token: query.token,
            owner: query.owner,
            spender: query.spender,
            amount,
            unlimited,
        }
    }
}

pub fn allowance_call(query: &AllowanceQuery) -> CallDescriptor {
    CallDescriptor::from_sol_call(
        query.token,
        &abi::allowanceCall {
            owner: query.owner,
            spender: query.spender,
        },
    )
}

pub fn allowance_request<F>(query: AllowanceQuery, on_allowance: F) -> Box<dyn PollRequest>
where
    F: FnOnce(Result<Allowance>) + Send + 'static,
{
    Box::new(FnPollRequest::new(
        format!("allowance:{}:{}", query.token, query.spender),
        allowance_call(&query),
        move |result: Result<&CallResult>, _: &RequestMeta| {
            on_allowance(
                result
                    .and_then(CallResult::decode_uint)
                    .map(|amount| Allowance::new(query, amount)),
            );
        },
    ))
}

use std::ops::Range;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use futures_util::future::join_all;

use crate::abi;
use crate::codec::{self, AbiType, AbiValue, Function};
use crate::error::{PollError, Result};
use crate::infra::config::PollConfig;
use crate::infra::rpc::Provider;
use crate::poll::request::PollRequest;
use crate::types::{self, Network};

/// One sub-call of an `aggregate3` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub target: Address,
    pub allow_failure: bool,
    pub call_data: Bytes,
}

impl CallDescriptor {
    pub fn new(target: Address, call_data: Bytes) -> Self {
        Self {
            target,
            allow_failure: true,
            call_data,
        }
    }

    pub fn from_sol_call<C: SolCall>(target: Address, call: &C) -> Self {
        Self::new(target, call.abi_encode().into())
    }

    pub fn from_function(target: Address, function: &Function, args: &[AbiValue]) -> Result<Self> {
        Ok(Self::new(target, function.encode_input(args)?))
    }

    /// A reverting sub-call with `allow_failure = false` reverts the whole aggregate.
    pub fn require_success(mut self) -> Self {
        self.allow_failure = false;
        self
    }

    fn to_abi_value(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Address(self.target),
            AbiValue::Bool(self.allow_failure),
            AbiValue::Bytes(self.call_data.to_vec()),
        ])
    }
}

/// Outcome of one sub-call, tagged with where it sat in the flattened batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub index: usize,
    pub target: Address,
    pub success: bool,
    pub return_data: Bytes,
}

impl CallResult {
    /// Return data of a successful call; a reverted call is a `PartialCallFailure`.
    pub fn data(&self) -> Result<&[u8]> {
        if !self.success {
            return Err(PollError::PartialCallFailure {
                target: self.target.to_string(),
                index: self.index,
            });
        }
        Ok(&self.return_data)
    }

    pub fn decode(&self, types: &[AbiType]) -> Result<Vec<AbiValue>> {
        codec::decode_return(types, self.data()?)
    }

    pub fn decode_uint(&self) -> Result<U256> {
        self.decode(&[AbiType::Uint(256)])?
            .first()
            .and_then(AbiValue::as_uint)
            .ok_or_else(|| PollError::decode("Expected a uint256 return value"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub requests: usize,
    pub calls: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub failed_requests: usize,
}

/// Flattened view of a set of requests: every call in submission order plus the
/// range each request owns.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub calls: Vec<CallDescriptor>,
    pub ranges: Vec<Range<usize>>,
    chunk_size: usize,
}

impl BatchPlan {
    pub fn new(requests: &[Box<dyn PollRequest>], chunk_size: usize) -> Self {
        let mut calls = Vec::new();
        let mut ranges = Vec::with_capacity(requests.len());
        for request in requests {
            let start = calls.len();
            calls.extend(request.calls());
            ranges.push(start..calls.len());
        }
        Self {
            calls,
            ranges,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks(&self) -> std::slice::Chunks<'_, CallDescriptor> {
        self.calls.chunks(self.chunk_size)
    }

    pub fn chunk_count(&self) -> usize {
        self.calls.len().div_ceil(self.chunk_size)
    }

    /// Chunk indices touched by `range`.
    pub fn chunks_for(&self, range: &Range<usize>) -> Range<usize> {
        if range.is_empty() {
            return 0..0;
        }
        (range.start / self.chunk_size)..((range.end - 1) / self.chunk_size + 1)
    }

    fn slice_results(
        &self,
        outcomes: &[Result<Vec<CallResult>>],
        range: &Range<usize>,
    ) -> Result<Vec<CallResult>> {
        for chunk in self.chunks_for(range) {
            if let Some(Err(err)) = outcomes.get(chunk) {
                return Err(err.clone());
            }
        }

        let mut out = Vec::with_capacity(range.len());
        for global in range.clone() {
            let chunk = global / self.chunk_size;
            let local = global % self.chunk_size;
            let result = match outcomes.get(chunk) {
                Some(Ok(results)) => results.get(local),
                _ => None,
            };
            match result {
                Some(result) => out.push(result.clone()),
                None => {
                    return Err(PollError::decode(format!(
                        "Missing result for call {global}"
                    )))
                }
            }
        }
        Ok(out)
    }
}

pub fn encode_aggregate3(calls: &[CallDescriptor]) -> Result<Bytes> {
    let values = vec![AbiValue::Array(
        calls.iter().map(CallDescriptor::to_abi_value).collect(),
    )];
    codec::encode_call(abi::aggregate3Call::SELECTOR, &values, &[call3_array_type()])
}

pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<(bool, Bytes)>> {
    let decoded = codec::decode_return(&[result_array_type()], data)?;
    let items = decoded
        .first()
        .and_then(AbiValue::as_slice)
        .ok_or_else(|| PollError::decode("aggregate3 returned no array"))?;

    items
        .iter()
        .map(|item| match item.as_slice() {
            Some([AbiValue::Bool(success), AbiValue::Bytes(data)]) => {
                Ok((*success, Bytes::from(data.clone())))
            }
            _ => Err(PollError::decode("Malformed aggregate3 result entry")),
        })
        .collect()
}

pub(crate) fn call3_array_type() -> AbiType {
    AbiType::Array(Box::new(AbiType::Tuple(vec![
        AbiType::Address,
        AbiType::Bool,
        AbiType::Bytes,
    ])))
}

pub(crate) fn result_array_type() -> AbiType {
    AbiType::Array(Box::new(AbiType::Tuple(vec![AbiType::Bool, AbiType::Bytes])))
}

#[derive(Debug, Clone)]
pub struct MulticallAggregator {
    max_calls_per_batch: usize,
    slow_call_threshold_ms: i64,
}

impl MulticallAggregator {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            max_calls_per_batch: config.max_calls_per_batch.max(1),
            slow_call_threshold_ms: config.slow_call_threshold_ms,
        }
    }

    pub fn max_calls_per_batch(&self) -> usize {
        self.max_calls_per_batch
    }

    /// Runs every request through as few `aggregate3` calls as the batch limit
    /// allows. Each handler is invoked exactly once, in submission order; a
    /// failed chunk only fails the requests whose calls landed in it.
    pub async fn execute(
        &self,
        provider: &dyn Provider,
        network: &Network,
        requests: Vec<Box<dyn PollRequest>>,
    ) -> BatchReport {
        let plan = BatchPlan::new(&requests, self.max_calls_per_batch);
        let mut report = BatchReport {
            requests: requests.len(),
            calls: plan.calls.len(),
            chunks: plan.chunk_count(),
            ..BatchReport::default()
        };

        if provider.chain_id() != network.chain_id {
            let err = PollError::invalid_params(format!(
                "Provider for chain {} used for {}",
                provider.chain_id(),
                network
            ));
            report.failed_chunks = report.chunks;
            for request in requests {
                report.failed_requests += 1;
                request.handle(Err(err.clone()));
            }
            return report;
        }

        let outcomes = join_all(plan.chunks().enumerate().map(|(i, chunk)| {
            self.execute_chunk(provider, network, chunk, i * plan.chunk_size())
        }))
        .await;
        report.failed_chunks = outcomes.iter().filter(|o| o.is_err()).count();

        for (request, range) in requests.into_iter().zip(plan.ranges.iter()) {
            match plan.slice_results(&outcomes, range) {
                Ok(results) => request.handle(Ok(results.as_slice())),
                Err(err) => {
                    report.failed_requests += 1;
                    request.handle(Err(err));
                }
            }
        }

        report
    }

    async fn execute_chunk(
        &self,
        provider: &dyn Provider,
        network: &Network,
        chunk: &[CallDescriptor],
        offset: usize,
    ) -> Result<Vec<CallResult>> {
        let data = encode_aggregate3(chunk)?;
        let started = types::now_ms();
        let raw = provider.call(network.multicall_address, data).await;
        let elapsed_ms = types::now_ms().saturating_sub(started);
        if elapsed_ms > self.slow_call_threshold_ms {
            log::warn!(
                "Slow aggregate3 on {}: {} calls in {}ms",
                network,
                chunk.len(),
                elapsed_ms
            );
        }

        let decoded = decode_aggregate3(&raw?)?;
        if decoded.len() != chunk.len() {
            return Err(PollError::decode(format!(
                "aggregate3 returned {} results for {} calls",
                decoded.len(),
                chunk.len()
            )));
        }

        Ok(chunk
            .iter()
            .zip(decoded)
            .enumerate()
            .map(|(i, (call, (success, return_data)))| CallResult {
                index: offset + i,
                target: call.target,
                success,
                return_data,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::request::{GroupPollRequest, RequestMeta};

    fn group(id: &str, n: usize) -> Box<dyn PollRequest> {
        let calls = (0..n)
            .map(|i| {
                CallDescriptor::from_sol_call(
                    Address::with_last_byte(i as u8),
                    &abi::decimalsCall {},
                )
            })
            .collect();
        Box::new(GroupPollRequest::new(
            id,
            calls,
            |_: Result<&[CallResult]>, _: &RequestMeta| {},
        ))
    }

    #[test]
    fn aggregate3_encoding_matches_sol_types() {
        let calls = vec![
            CallDescriptor::from_sol_call(
                Address::repeat_byte(0xf0),
                &abi::balanceOfCall {
                    account: Address::repeat_byte(0x11),
                },
            ),
            CallDescriptor::from_sol_call(Address::repeat_byte(0xca), &abi::getBasefeeCall {})
                .require_success(),
        ];

        let ours = encode_aggregate3(&calls).unwrap();
        let reference = abi::aggregate3Call {
            calls: calls
                .iter()
                .map(|c| abi::Call3 {
                    target: c.target,
                    allowFailure: c.allow_failure,
                    callData: c.call_data.clone(),
                })
                .collect(),
        }
        .abi_encode();

        assert_eq!(ours.to_vec(), reference);
    }

    #[test]
    fn decodes_aggregate3_results() {
        let values = vec![AbiValue::Array(vec![
            AbiValue::Tuple(vec![
                AbiValue::Bool(true),
                AbiValue::Bytes(U256::from(7u8).to_be_bytes::<32>().to_vec()),
            ]),
            AbiValue::Tuple(vec![AbiValue::Bool(false), AbiValue::Bytes(vec![])]),
        ])];
        let raw = codec::encode_params(&[result_array_type()], &values).unwrap();

        let decoded = decode_aggregate3(&raw).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].0);
        assert!(!decoded[1].0);
        assert!(decoded[1].1.is_empty());
    }

    #[test]
    fn plan_records_ranges_in_submission_order() {
        let requests = vec![group("a", 3), group("b", 0), group("c", 4)];
        let plan = BatchPlan::new(&requests, 2);

        assert_eq!(plan.calls.len(), 7);
        assert_eq!(plan.ranges, vec![0..3, 3..3, 3..7]);
        assert_eq!(plan.chunk_count(), 4);
        assert_eq!(plan.chunks().map(|c| c.len()).sum::<usize>(), 7);
        assert_eq!(plan.chunks_for(&(0..3)), 0..2);
        assert_eq!(plan.chunks_for(&(3..3)), 0..0);
        assert_eq!(plan.chunks_for(&(3..7)), 1..4);
    }

    #[test]
    fn slice_fails_only_requests_touching_failed_chunk() {
        let requests = vec![group("a", 2), group("b", 2)];
        let plan = BatchPlan::new(&requests, 2);
        let ok_chunk = (0..2)
            .map(|i| CallResult {
                index: i,
                target: Address::ZERO,
                success: true,
                return_data: Bytes::new(),
            })
            .collect();
        let outcomes = vec![Ok(ok_chunk), Err(PollError::transport("down"))];

        let first = plan.slice_results(&outcomes, &plan.ranges[0]).unwrap();
        assert_eq!(first.len(), 2);
        let second = plan.slice_results(&outcomes, &plan.ranges[1]).unwrap_err();
        assert!(second.is_retryable());
    }

    #[test]
    fn reverted_result_reports_partial_failure() {
        let result = CallResult {
            index: 4,
            target: Address::repeat_byte(0xde),
            success: false,
            return_data: Bytes::new(),
        };
        let err = result.decode_uint().unwrap_err();
        assert!(matches!(err, PollError::PartialCallFailure { index: 4, .. }));
    }

    #[test]
    fn short_return_data_is_decode_error() {
        let result = CallResult {
            index: 0,
            target: Address::ZERO,
            success: true,
            return_data: Bytes::from(vec![0u8; 8]),
        };
        assert!(matches!(result.decode_uint(), Err(PollError::AbiDecode(_))));
    }
}

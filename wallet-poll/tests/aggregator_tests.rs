mod support;

use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use wallet_poll::abi;
use wallet_poll::error::{PollError, Result};
use wallet_poll::infra::config::PollConfig;
use wallet_poll::infra::multicall::{CallDescriptor, CallResult, MulticallAggregator};
use wallet_poll::infra::networks::NetworkRegistry;
use wallet_poll::poll::request::{FnPollRequest, GroupPollRequest, PollRequest, RequestMeta};

use support::{token_address, MockProvider, CULT, USDT, WALLET};

fn aggregator(limit: usize) -> MulticallAggregator {
    MulticallAggregator::new(&PollConfig::default().with_max_calls_per_batch(limit))
}

fn balance_call(token: alloy_primitives::Address) -> CallDescriptor {
    CallDescriptor::from_sol_call(token, &abi::balanceOfCall { account: WALLET })
}

type Seen = Arc<Mutex<Vec<(String, Result<Vec<CallResult>>)>>>;

fn recording_group(id: &str, calls: Vec<CallDescriptor>, seen: &Seen) -> Box<dyn PollRequest> {
    let seen = Arc::clone(seen);
    Box::new(GroupPollRequest::new(
        id,
        calls,
        move |results: Result<&[CallResult]>, meta: &RequestMeta| {
            seen.lock()
                .unwrap()
                .push((meta.id.clone(), results.map(|r| r.to_vec())));
        },
    ))
}

#[tokio::test]
async fn handlers_run_in_submission_order_across_chunks() {
    let provider = MockProvider::new(1);
    for i in 0..10 {
        provider.add_token(token_address(i), "T", "T", 18);
        provider.set_balance(token_address(i), WALLET, U256::from(i as u64 * 7));
    }
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = (0..5)
        .map(|r| {
            let calls = (0..2).map(|c| balance_call(token_address(r * 2 + c))).collect();
            recording_group(&format!("req{r}"), calls, &seen)
        })
        .collect();

    let report = aggregator(3).execute(&provider, &network, requests).await;
    assert_eq!(report.calls, 10);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(provider.aggregate_calls(), 4);
    assert_eq!(provider.batch_sizes().iter().sum::<usize>(), 10);

    let seen = seen.lock().unwrap();
    let ids: Vec<&str> = seen.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["req0", "req1", "req2", "req3", "req4"]);
    for (r, (_, results)) in seen.iter().enumerate() {
        let results = results.as_ref().unwrap();
        assert_eq!(results.len(), 2);
        for (c, result) in results.iter().enumerate() {
            let i = r * 2 + c;
            assert_eq!(result.index, i);
            assert_eq!(result.target, token_address(i));
            assert_eq!(result.decode_uint().unwrap(), U256::from(i as u64 * 7));
        }
    }
}

#[tokio::test]
async fn failed_chunk_only_fails_its_requests() {
    let provider = MockProvider::ethereum();
    provider.fail_batches_containing(USDT);
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = vec![
        recording_group("cult", vec![balance_call(CULT), balance_call(CULT)], &seen),
        recording_group("usdt", vec![balance_call(USDT)], &seen),
    ];
    let report = aggregator(2).execute(&provider, &network, requests).await;
    assert_eq!(report.chunks, 2);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(report.failed_requests, 1);

    let seen = seen.lock().unwrap();
    assert!(seen[0].1.is_ok());
    assert!(matches!(&seen[1].1, Err(PollError::Transport(_))));
}

#[tokio::test]
async fn request_spanning_a_failed_chunk_fails_whole() {
    let provider = MockProvider::ethereum();
    provider.fail_batches_containing(USDT);
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = vec![recording_group(
        "both",
        vec![balance_call(CULT), balance_call(USDT)],
        &seen,
    )];
    aggregator(1).execute(&provider, &network, requests).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1.as_ref().unwrap_err().is_retryable());
}

#[tokio::test]
async fn reverted_sub_call_keeps_siblings() {
    let provider = MockProvider::ethereum();
    provider.set_reverting(USDT, true);
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = vec![recording_group(
        "pair",
        vec![balance_call(CULT), balance_call(USDT)],
        &seen,
    )];
    aggregator(100).execute(&provider, &network, requests).await;

    let seen = seen.lock().unwrap();
    let results = seen[0].1.as_ref().unwrap();
    assert!(results[0].decode_uint().is_ok());
    assert!(matches!(
        results[1].decode_uint(),
        Err(PollError::PartialCallFailure { index: 1, .. })
    ));
}

#[tokio::test]
async fn required_call_reverting_fails_the_chunk() {
    let provider = MockProvider::ethereum();
    provider.set_reverting(USDT, true);
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = vec![recording_group(
        "strict",
        vec![balance_call(CULT), balance_call(USDT).require_success()],
        &seen,
    )];
    let report = aggregator(100).execute(&provider, &network, requests).await;
    assert_eq!(report.failed_chunks, 1);
    assert!(seen.lock().unwrap()[0].1.is_err());
}

#[tokio::test]
async fn provider_for_wrong_chain_fails_every_request() {
    let provider = MockProvider::new(137);
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let seen: Seen = Arc::default();

    let requests = vec![recording_group("a", vec![balance_call(CULT)], &seen)];
    let report = aggregator(100).execute(&provider, &network, requests).await;
    assert_eq!(report.failed_requests, 1);
    assert_eq!(provider.aggregate_calls(), 0);
    assert!(matches!(
        seen.lock().unwrap()[0].1,
        Err(PollError::InvalidParams(_))
    ));
}

#[tokio::test]
async fn single_function_request_gets_one_result() {
    let provider = MockProvider::ethereum();
    let network = NetworkRegistry::with_defaults().get(1).unwrap().clone();
    let got = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&got);

    let request = FnPollRequest::new(
        "usdt",
        balance_call(USDT),
        move |result: Result<&CallResult>, _: &RequestMeta| {
            *sink.lock().unwrap() = Some(result.and_then(CallResult::decode_uint));
        },
    );
    aggregator(100)
        .execute(&provider, &network, vec![Box::new(request)])
        .await;

    assert_eq!(
        got.lock().unwrap().clone(),
        Some(Ok(U256::from(1_500_000u64)))
    );
}

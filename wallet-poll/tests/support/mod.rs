#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tokio::sync::oneshot;

use wallet_poll::abi;
use wallet_poll::codec::{self, AbiType, AbiValue};
use wallet_poll::domain::fees::FeeEstimate;
use wallet_poll::error::{PollError, Result};
use wallet_poll::infra::rpc::Provider;
use wallet_poll::poll::listener::{BalanceUpdate, PollListener};
use wallet_poll::types::{Currency, Network, MULTICALL3_ADDRESS};

pub const CULT: Address = address!("f0f9d895aca5c8678f706fb8216fa22957685a13");
pub const USDT: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
pub const WALLET: Address = address!("00000000000000000000000000000000000a11ce");

pub fn token_address(i: usize) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0x70;
    bytes[16..].copy_from_slice(&(i as u32).to_be_bytes());
    Address::from(bytes)
}

#[derive(Debug, Clone)]
struct MockToken {
    name: String,
    symbol: String,
    decimals: u8,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

#[derive(Debug, Default)]
struct MockChain {
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, MockToken>,
    reverting: HashSet<Address>,
    truncated: HashSet<Address>,
    base_fee: U256,
}

/// Answers `aggregate3` the way Multicall3 would, against an in-memory chain.
pub struct MockProvider {
    chain_id: u64,
    chain: Mutex<MockChain>,
    aggregate_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    offline: AtomicBool,
    fail_targets: Mutex<HashSet<Address>>,
    holds: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

impl MockProvider {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            chain: Mutex::new(MockChain::default()),
            aggregate_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            fail_targets: Mutex::new(HashSet::new()),
            holds: Mutex::new(VecDeque::new()),
        }
    }

    /// Ethereum with ETH, CULT and USDT balances for `WALLET`.
    pub fn ethereum() -> Self {
        let provider = Self::new(1);
        provider.set_native(WALLET, U256::from(2_500_000_000_000_000_000u128));
        provider.add_token(CULT, "Cult DAO", "CULT", 18);
        provider.add_token(USDT, "Tether USD", "USDT", 6);
        provider.set_balance(CULT, WALLET, U256::from(10u64).pow(U256::from(24u64)));
        provider.set_balance(USDT, WALLET, U256::from(1_500_000u64));
        provider
    }

    pub fn set_native(&self, owner: Address, value: U256) {
        self.chain.lock().unwrap().native.insert(owner, value);
    }

    pub fn add_token(&self, token: Address, name: &str, symbol: &str, decimals: u8) {
        self.chain.lock().unwrap().tokens.insert(
            token,
            MockToken {
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals,
                total_supply: U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(decimals)),
                balances: HashMap::new(),
                allowances: HashMap::new(),
            },
        );
    }

    pub fn set_balance(&self, token: Address, owner: Address, value: U256) {
        if let Some(t) = self.chain.lock().unwrap().tokens.get_mut(&token) {
            t.balances.insert(owner, value);
        }
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        if let Some(t) = self.chain.lock().unwrap().tokens.get_mut(&token) {
            t.allowances.insert((owner, spender), value);
        }
    }

    pub fn set_reverting(&self, target: Address, reverting: bool) {
        let mut chain = self.chain.lock().unwrap();
        if reverting {
            chain.reverting.insert(target);
        } else {
            chain.reverting.remove(&target);
        }
    }

    /// Calls to `target` succeed but return one byte short of a word.
    pub fn set_truncated(&self, target: Address) {
        self.chain.lock().unwrap().truncated.insert(target);
    }

    pub fn set_base_fee(&self, value: U256) {
        self.chain.lock().unwrap().base_fee = value;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Any aggregate that includes a sub-call to `target` fails at transport level.
    pub fn fail_batches_containing(&self, target: Address) {
        self.fail_targets.lock().unwrap().insert(target);
    }

    /// The next aggregate call blocks until the returned sender fires.
    pub fn hold_next_call(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.holds.lock().unwrap().push_back(rx);
        tx
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn execute(&self, calls: &[abi::Call3]) -> Result<Vec<AbiValue>> {
        let chain = self.chain.lock().unwrap();
        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = if chain.reverting.contains(&call.target) {
                None
            } else {
                dispatch(&chain, call.target, &call.callData)
            };
            if outcome.is_none() && !call.allowFailure {
                return Err(PollError::transport("execution reverted: Multicall3: call failed"));
            }
            let (success, data) = match outcome {
                Some(mut data) if chain.truncated.contains(&call.target) => {
                    data.truncate(31);
                    (true, data)
                }
                Some(data) => (true, data),
                None => (false, Vec::new()),
            };
            out.push(AbiValue::Tuple(vec![AbiValue::Bool(success), AbiValue::Bytes(data)]));
        }
        Ok(out)
    }
}

fn word(value: U256) -> Vec<u8> {
    value.to_be_bytes::<32>().to_vec()
}

fn string_return(value: &str) -> Vec<u8> {
    codec::encode_params(&[AbiType::String], &[AbiValue::String(value.to_string())]).unwrap()
}

fn dispatch(chain: &MockChain, target: Address, data: &[u8]) -> Option<Vec<u8>> {
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;

    if target == MULTICALL3_ADDRESS {
        if selector == abi::getEthBalanceCall::SELECTOR {
            let call = abi::getEthBalanceCall::abi_decode(data, true).ok()?;
            return Some(word(chain.native.get(&call.addr).copied().unwrap_or_default()));
        }
        if selector == abi::getBasefeeCall::SELECTOR {
            return Some(word(chain.base_fee));
        }
        return None;
    }

    let token = chain.tokens.get(&target)?;
    if selector == abi::balanceOfCall::SELECTOR {
        let call = abi::balanceOfCall::abi_decode(data, true).ok()?;
        Some(word(token.balances.get(&call.account).copied().unwrap_or_default()))
    } else if selector == abi::allowanceCall::SELECTOR {
        let call = abi::allowanceCall::abi_decode(data, true).ok()?;
        let value = token.allowances.get(&(call.owner, call.spender)).copied();
        Some(word(value.unwrap_or_default()))
    } else if selector == abi::nameCall::SELECTOR {
        Some(string_return(&token.name))
    } else if selector == abi::symbolCall::SELECTOR {
        Some(string_return(&token.symbol))
    } else if selector == abi::decimalsCall::SELECTOR {
        Some(word(U256::from(token.decimals)))
    } else if selector == codec::encode_function_selector("totalSupply()").ok()? {
        Some(word(token.total_supply))
    } else {
        None
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, target: Address, data: Bytes) -> Result<Bytes> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.holds.lock().unwrap().pop_front();
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(PollError::transport("connection refused"));
        }
        if target != MULTICALL3_ADDRESS {
            return Err(PollError::transport(format!("no multicall at {target}")));
        }

        let decoded = abi::aggregate3Call::abi_decode(&data, true)
            .map_err(|err| PollError::transport(err.to_string()))?;
        self.batch_sizes.lock().unwrap().push(decoded.calls.len());

        let fail_targets = self.fail_targets.lock().unwrap().clone();
        if decoded.calls.iter().any(|c| fail_targets.contains(&c.target)) {
            return Err(PollError::transport("upstream timeout"));
        }

        let results = self.execute(&decoded.calls)?;
        let encoded = codec::encode_params(
            &[AbiType::parse("(bool,bytes)[]")?],
            &[AbiValue::Array(results)],
        )?;
        Ok(Bytes::from(encoded))
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub updates: Mutex<Vec<BalanceUpdate>>,
    pub failures: Mutex<Vec<(u64, PollError)>>,
    pub fees: Mutex<Vec<FeeEstimate>>,
}

impl RecordingListener {
    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }
}

impl PollListener for RecordingListener {
    fn on_balances_changed(&self, update: &BalanceUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }

    fn on_fee_updated(&self, _network: &Network, estimate: &FeeEstimate) {
        self.fees.lock().unwrap().push(estimate.clone());
    }

    fn on_poll_failed(&self, network: &Network, error: &PollError) {
        self.failures
            .lock()
            .unwrap()
            .push((network.chain_id, error.clone()));
    }
}

pub fn erc20(i: usize) -> Currency {
    Currency::erc20(
        &format!("Token {i}"),
        &format!("T{i}"),
        18,
        token_address(i),
        None,
    )
}

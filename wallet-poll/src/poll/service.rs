use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::codec::{AbiValue, Function};
use crate::domain::allowance::{self, Allowance, AllowanceQuery};
use crate::domain::balances;
use crate::domain::fees::{self, FeeEstimate};
use crate::domain::metadata;
use crate::error::{PollError, Result};
use crate::infra::config::PollConfig;
use crate::infra::multicall::{BatchReport, CallDescriptor, CallResult, MulticallAggregator};
use crate::infra::networks::NetworkRegistry;
use crate::infra::rpc::Provider;
use crate::infra::store::{self, CurrencyStore};
use crate::infra::structured_log::CycleContext;
use crate::poll::listener::{BalanceUpdate, ListenerId, PollListener};
use crate::poll::request::{FnPollRequest, PollRequest, RequestMeta};
use crate::poll::state::{InFlight, WalletSnapshot, WalletState};
use crate::types::{self, Currency, CurrencyId, Network};

/// Identity of one poll cycle, captured before the provider is called.
struct Cycle {
    seq: u64,
    epoch: u64,
    in_flight: InFlight,
    trace_id: String,
    start_ms: i64,
}

/// Polls balances and fees for a wallet and keeps the merged state.
///
/// All collaborators are injected. Cycles for different networks may run
/// concurrently; merges are serialized through one async lock and a merge is
/// dropped when its network was switched away from after the cycle began, or
/// when a newer cycle has already been applied.
pub struct PollService {
    registry: NetworkRegistry,
    providers: HashMap<u64, Arc<dyn Provider>>,
    store: Arc<dyn CurrencyStore>,
    config: PollConfig,
    aggregator: MulticallAggregator,
    state: Mutex<WalletState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PollListener>)>>,
    next_listener_id: AtomicU64,
    next_seq: AtomicU64,
}

impl PollService {
    pub fn new(registry: NetworkRegistry, store: Arc<dyn CurrencyStore>, config: PollConfig) -> Self {
        Self {
            aggregator: MulticallAggregator::new(&config),
            registry,
            providers: HashMap::new(),
            store,
            config,
            state: Mutex::new(WalletState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Registers `provider` for the chain it reports.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.chain_id(), provider);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn network(&self, chain_id: u64) -> Result<&Network> {
        self.registry.get(chain_id)
    }

    fn provider(&self, chain_id: u64) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(&chain_id)
            .cloned()
            .ok_or(PollError::MissingProvider(chain_id))
    }

    pub async fn add_listener(&self, listener: Arc<dyn PollListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().await.push((id, listener));
        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    async fn notify<F>(&self, f: F)
    where
        F: Fn(&dyn PollListener),
    {
        let listeners: Vec<Arc<dyn PollListener>> = self
            .listeners
            .lock()
            .await
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    /// Makes `chain_id` the active network. Cycles in flight for the network
    /// being left will not merge; their transport calls still run to
    /// completion. Other networks are unaffected.
    pub async fn switch_network(&self, chain_id: u64) -> Result<Network> {
        let network = self.network(chain_id)?.clone();
        let mut state = self.state.lock().await;
        if let Some(previous) = state.active.filter(|id| *id != chain_id) {
            let left = state.network_mut(previous);
            left.epoch += 1;
            log::info!("Leaving chain {} (epoch {})", previous, left.epoch);
        }
        state.active = Some(chain_id);
        log::info!("Switched active network to {}", network);
        Ok(network)
    }

    pub async fn active_network(&self) -> Option<u64> {
        self.state.lock().await.active
    }

    pub async fn snapshot(&self, chain_id: u64) -> WalletSnapshot {
        self.state.lock().await.snapshot(chain_id)
    }

    /// Snapshot that triggers a refresh first when nothing is cached for the
    /// network yet.
    pub async fn snapshot_or_poll(&self, chain_id: u64, wallet: Address) -> Result<WalletSnapshot> {
        let empty = !self.state.lock().await.has_balances(chain_id);
        if empty {
            self.refresh(chain_id, wallet).await?;
        }
        Ok(self.snapshot(chain_id).await)
    }

    /// Loads balances persisted by an earlier session. Only fills gaps; a value
    /// already polled in this session wins. Returns how many were restored.
    pub async fn restore_cached(&self, chain_id: u64, wallet: Address) -> Result<usize> {
        let network = self.network(chain_id)?;
        let currencies = self.store.currencies(network).await?;
        let cached = self.store.cached_balances(network, wallet).await?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let network_state = state.networks.entry(chain_id).or_default();
        for currency in currencies {
            network_state.currencies.entry(currency.id()).or_insert(currency);
        }

        let mut restored = 0;
        for (id, value) in cached {
            if !network_state.currencies.contains_key(&id) {
                continue;
            }
            if let Entry::Vacant(slot) = state.balances.entry((chain_id, id)) {
                slot.insert(value);
                restored += 1;
            }
        }
        if restored > 0 && network_state.last_applied_seq == 0 {
            network_state.restored = true;
        }
        Ok(restored)
    }

    /// Polls the store's currencies for `chain_id`.
    pub async fn refresh(&self, chain_id: u64, wallet: Address) -> Result<BalanceUpdate> {
        let network = self.network(chain_id)?.clone();
        let currencies = self.store.currencies(&network).await?;
        self.poll_once(&network, wallet, &currencies).await
    }

    /// Refreshes every registered network that has a provider.
    pub async fn refresh_all(&self, wallet: Address) -> Vec<(u64, Result<BalanceUpdate>)> {
        let mut chain_ids: Vec<u64> = self
            .registry
            .networks()
            .map(|n| n.chain_id)
            .filter(|id| self.providers.contains_key(id))
            .collect();
        chain_ids.sort_unstable();

        let outcomes = join_all(chain_ids.iter().map(|id| self.refresh(*id, wallet))).await;
        chain_ids.into_iter().zip(outcomes).collect()
    }

    async fn begin_cycle(&self, chain_id: u64) -> Cycle {
        let mut state = self.state.lock().await;
        let network_state = state.network_mut(chain_id);
        Cycle {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
            epoch: network_state.epoch,
            in_flight: InFlight::enter(&network_state.in_flight),
            trace_id: types::new_trace_id(),
            start_ms: types::now_ms(),
        }
    }

    fn stale_reason(
        (started_epoch, seq): (u64, u64),
        epoch: u64,
        last_seq: u64,
    ) -> Option<&'static str> {
        if started_epoch != epoch {
            Some("network_switched")
        } else if seq < last_seq {
            Some("out_of_order")
        } else {
            None
        }
    }

    /// Reads every currency's balance in as few `aggregate3` calls as the
    /// batch limit allows and merges the result.
    ///
    /// A reverted or undecodable item is reported in `failures` and keeps its
    /// previous value. When no chunk reaches the chain the cycle fails and
    /// state is left as it was.
    pub async fn poll_once(
        &self,
        network: &Network,
        wallet: Address,
        currencies: &[Currency],
    ) -> Result<BalanceUpdate> {
        let chain_id = network.chain_id;
        let provider = self.provider(chain_id)?;
        let cycle = self.begin_cycle(chain_id).await;
        let ctx = CycleContext::new(&cycle.trace_id, chain_id, cycle.seq, cycle.start_ms);
        ctx.log_cycle_start(currencies.len());

        let (tx, mut rx) = mpsc::unbounded_channel::<(CurrencyId, Result<U256>)>();
        let requests: Vec<Box<dyn PollRequest>> = currencies
            .iter()
            .map(|currency| {
                let tx = tx.clone();
                balances::balance_request(network, wallet, currency, move |id, value| {
                    let _ = tx.send((id, value));
                })
            })
            .collect();
        drop(tx);

        let report = self
            .aggregator
            .execute(provider.as_ref(), network, requests)
            .await;
        let mut items = Vec::with_capacity(currencies.len());
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        drop(cycle.in_flight);
        let (epoch, last_seq) = {
            let network_state = state.network_mut(chain_id);
            (network_state.epoch, network_state.last_applied_seq)
        };
        if let Some(reason) = Self::stale_reason((cycle.epoch, cycle.seq), epoch, last_seq) {
            drop(guard);
            ctx.log_stale_drop(reason);
            return Err(PollError::StaleCycle {
                chain_id,
                seq: cycle.seq,
            });
        }

        if report.chunks > 0 && report.failed_chunks == report.chunks {
            let err = items
                .iter()
                .find_map(|(_, value)| value.as_ref().err().cloned())
                .unwrap_or_else(|| PollError::transport("All chunks failed"));
            state.network_mut(chain_id).last_error = Some(err.clone());
            drop(guard);
            ctx.log_cycle_error(&err);
            self.notify(|l| l.on_poll_failed(network, &err)).await;
            return Err(err);
        }

        let by_id: HashMap<CurrencyId, &Currency> =
            currencies.iter().map(|c| (c.id(), c)).collect();
        let network_state = state.networks.entry(chain_id).or_default();
        for currency in currencies {
            network_state
                .currencies
                .insert(currency.id(), currency.clone());
        }

        let mut update = BalanceUpdate {
            chain_id,
            seq: cycle.seq,
            trace_id: cycle.trace_id.clone(),
            changed: Vec::new(),
            failures: Vec::new(),
        };
        let mut fresh = Vec::new();
        for (id, value) in items {
            match value {
                Ok(value) => {
                    let previous = state.balances.insert((chain_id, id.clone()), value);
                    if previous != Some(value) || network_state.restored {
                        if let Some(currency) = by_id.get(&id) {
                            update.changed.push(((*currency).clone(), value));
                        }
                    }
                    fresh.push((id, value));
                }
                Err(err) => update.failures.push((id, err)),
            }
        }

        network_state.last_applied_seq = cycle.seq;
        network_state.last_updated_ms = Some(types::now_ms());
        network_state.restored = false;
        network_state.last_error = if report.failed_chunks > 0 {
            update.failures.first().map(|(_, err)| err.clone())
        } else {
            None
        };
        drop(guard);

        if let Err(err) = self.store.save_balances(network, wallet, &fresh).await {
            log::warn!("Failed to cache balances for {}: {}", network, err);
        }

        let status = if update.failures.is_empty() { "ok" } else { "partial" };
        ctx.log_cycle_complete(report.calls, report.chunks, status);
        self.notify(|l| l.on_balances_changed(&update)).await;
        Ok(update)
    }

    /// Reads the base fee through the network's Multicall3 and stores the
    /// derived estimate.
    pub async fn poll_fees(&self, chain_id: u64) -> Result<FeeEstimate> {
        let network = self.network(chain_id)?.clone();
        let provider = self.provider(chain_id)?;
        let cycle = self.begin_cycle(chain_id).await;
        let ctx = CycleContext::new(&cycle.trace_id, chain_id, cycle.seq, cycle.start_ms);
        ctx.log_cycle_start(1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = fees::fee_request(&network, move |estimate| {
            let _ = tx.send(estimate);
        });
        let report = self
            .aggregator
            .execute(provider.as_ref(), &network, vec![request])
            .await;
        let estimate = rx
            .try_recv()
            .unwrap_or_else(|_| Err(PollError::decode("Fee handler produced no result")));

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        drop(cycle.in_flight);
        let (epoch, last_seq) = {
            let network_state = state.network_mut(chain_id);
            (network_state.epoch, network_state.last_fee_seq)
        };
        if let Some(reason) = Self::stale_reason((cycle.epoch, cycle.seq), epoch, last_seq) {
            drop(guard);
            ctx.log_stale_drop(reason);
            return Err(PollError::StaleCycle {
                chain_id,
                seq: cycle.seq,
            });
        }

        match estimate {
            Ok(estimate) => {
                let network_state = state.network_mut(chain_id);
                network_state.fee = Some(estimate.clone());
                network_state.last_fee_seq = cycle.seq;
                drop(guard);
                ctx.log_cycle_complete(report.calls, report.chunks, "ok");
                self.notify(|l| l.on_fee_updated(&network, &estimate)).await;
                Ok(estimate)
            }
            Err(err) => {
                state.network_mut(chain_id).last_error = Some(err.clone());
                drop(guard);
                ctx.log_cycle_error(&err);
                self.notify(|l| l.on_poll_failed(&network, &err)).await;
                Err(err)
            }
        }
    }

    /// Reads ERC-20 allowances in one batch. Results line up with `queries`.
    pub async fn allowances(
        &self,
        chain_id: u64,
        queries: &[AllowanceQuery],
    ) -> Result<Vec<Result<Allowance>>> {
        let network = self.network(chain_id)?;
        let provider = self.provider(chain_id)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let requests = queries
            .iter()
            .map(|query| {
                let tx = tx.clone();
                allowance::allowance_request(*query, move |allowance| {
                    let _ = tx.send(allowance);
                })
            })
            .collect();
        drop(tx);

        let report = self.aggregator.execute(provider.as_ref(), network, requests).await;
        log_adhoc(network, "allowances", &report);

        let mut out = Vec::with_capacity(queries.len());
        while let Ok(allowance) = rx.try_recv() {
            out.push(allowance);
        }
        Ok(out)
    }

    /// Reads `name`, `symbol` and `decimals` of `token` and adds it to the
    /// store for the network.
    pub async fn discover_currency(&self, chain_id: u64, token: Address) -> Result<Currency> {
        let network = self.network(chain_id)?;
        let provider = self.provider(chain_id)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = metadata::metadata_request(token, move |currency| {
            let _ = tx.send(currency);
        });
        let report = self
            .aggregator
            .execute(provider.as_ref(), network, vec![request])
            .await;
        log_adhoc(network, "discover_currency", &report);

        let currency = rx
            .try_recv()
            .unwrap_or_else(|_| Err(PollError::decode("Metadata handler produced no result")))?;
        let added = self.store.add_currency(network, currency.clone()).await?;
        if added {
            log::info!("Tracking {} on {}", currency.symbol, network);
        }
        Ok(currency)
    }

    /// Looks up a tracked currency by symbol or contract address.
    pub async fn find_currency(&self, chain_id: u64, query: &str) -> Result<Currency> {
        let network = self.network(chain_id)?;
        let currencies = self.store.currencies(network).await?;
        store::resolve_currency(&currencies, query).cloned()
    }

    /// Calls any view function described by a human-readable signature,
    /// e.g. `"totalSupply() returns (uint256)"`. The signature is parsed
    /// before anything is sent.
    pub async fn call_function(
        &self,
        chain_id: u64,
        target: Address,
        signature: &str,
        args: &[AbiValue],
    ) -> Result<Vec<AbiValue>> {
        let function = Function::parse(signature)?;
        let network = self.network(chain_id)?;
        let provider = self.provider(chain_id)?;
        let call = CallDescriptor::from_function(target, &function, args)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = FnPollRequest::new(
            format!("call:{}", function.name),
            call,
            move |result: Result<&CallResult>, _: &RequestMeta| {
                let decoded = result
                    .and_then(CallResult::data)
                    .and_then(|data| function.decode_output(data));
                let _ = tx.send(decoded);
            },
        );
        let report = self
            .aggregator
            .execute(provider.as_ref(), network, vec![Box::new(request)])
            .await;
        log_adhoc(network, "call_function", &report);

        rx.try_recv()
            .unwrap_or_else(|_| Err(PollError::decode("Call handler produced no result")))
    }

    /// Polls balances and fees for `chain_id` every `poll_interval_ms` until the
    /// handle is stopped. The first tick fires immediately.
    pub fn spawn_periodic(self: &Arc<Self>, chain_id: u64, wallet: Address) -> PollHandle {
        let service = Arc::clone(self);
        let period = self.config.poll_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = service.refresh(chain_id, wallet).await {
                    log::warn!("Periodic balance poll failed on chain {}: {}", chain_id, err);
                }
                if let Err(err) = service.poll_fees(chain_id).await {
                    log::warn!("Periodic fee poll failed on chain {}: {}", chain_id, err);
                }
            }
        });
        PollHandle { chain_id, task }
    }
}

fn log_adhoc(network: &Network, operation: &str, report: &BatchReport) {
    if report.failed_requests > 0 {
        log::warn!(
            "{} on {}: {}/{} requests failed across {} chunks",
            operation,
            network,
            report.failed_requests,
            report.requests,
            report.chunks
        );
    } else {
        log::debug!(
            "{} on {}: {} calls in {} chunks",
            operation,
            network,
            report.calls,
            report.chunks
        );
    }
}

/// Handle to a periodic poll task.
pub struct PollHandle {
    chain_id: u64,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the task and waits for it to unwind. A cycle in flight is
    /// abandoned without merging and its network goes back to idle.
    pub async fn stop(self) {
        self.task.abort();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                log::warn!("Periodic poll task on chain {} panicked: {}", self.chain_id, err);
            }
        }
    }
}

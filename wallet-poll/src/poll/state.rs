use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use serde::Serialize;

use crate::domain::balances::BalanceEntry;
use crate::domain::fees::FeeEstimate;
use crate::error::PollError;
use crate::types::{Currency, CurrencyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Idle,
    Polling,
}

/// Marks one cycle as in flight for as long as it lives. Dropping it, including
/// when the cycle's future is cancelled, brings the network back to idle.
#[derive(Debug)]
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NetworkState {
    pub in_flight: Arc<AtomicUsize>,
    /// Bumped when the user switches away from this network.
    pub epoch: u64,
    pub last_error: Option<PollError>,
    pub fee: Option<FeeEstimate>,
    pub last_applied_seq: u64,
    pub last_fee_seq: u64,
    pub last_updated_ms: Option<i64>,
    /// Balances were restored from the store and not yet confirmed on chain.
    pub restored: bool,
    pub currencies: HashMap<CurrencyId, Currency>,
}

impl NetworkState {
    pub fn status(&self) -> PollStatus {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            PollStatus::Polling
        } else {
            PollStatus::Idle
        }
    }
}

/// Mutable wallet state. Only the poll service writes it, always under its
/// merge lock.
#[derive(Debug, Default)]
pub(crate) struct WalletState {
    pub balances: HashMap<(u64, CurrencyId), U256>,
    pub networks: HashMap<u64, NetworkState>,
    pub active: Option<u64>,
}

impl WalletState {
    pub fn network_mut(&mut self, chain_id: u64) -> &mut NetworkState {
        self.networks.entry(chain_id).or_default()
    }

    pub fn has_balances(&self, chain_id: u64) -> bool {
        self.balances.keys().any(|(id, _)| *id == chain_id)
    }

    pub fn snapshot(&self, chain_id: u64) -> WalletSnapshot {
        let network = self.networks.get(&chain_id);
        let mut balances: Vec<BalanceEntry> = self
            .balances
            .iter()
            .filter(|((id, _), _)| *id == chain_id)
            .filter_map(|((_, currency_id), raw)| {
                let currency = network?.currencies.get(currency_id)?;
                Some(BalanceEntry::new(currency.clone(), *raw))
            })
            .collect();
        balances.sort_by(|a, b| {
            b.currency
                .is_native()
                .cmp(&a.currency.is_native())
                .then_with(|| a.currency.symbol.cmp(&b.currency.symbol))
        });

        WalletSnapshot {
            chain_id,
            active: self.active == Some(chain_id),
            status: network.map(NetworkState::status).unwrap_or(PollStatus::Idle),
            stale: network.map(|n| n.restored).unwrap_or(false),
            balances,
            fee: network.and_then(|n| n.fee.clone()),
            last_error: network
                .and_then(|n| n.last_error.as_ref())
                .map(ToString::to_string),
            last_updated_ms: network.and_then(|n| n.last_updated_ms),
        }
    }
}

/// Read-only copy of one network's slice of wallet state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub chain_id: u64,
    pub active: bool,
    pub status: PollStatus,
    pub stale: bool,
    pub balances: Vec<BalanceEntry>,
    pub fee: Option<FeeEstimate>,
    pub last_error: Option<String>,
    pub last_updated_ms: Option<i64>,
}

impl WalletSnapshot {
    pub fn balance(&self, symbol: &str) -> Option<U256> {
        self.balances
            .iter()
            .find(|b| b.currency.symbol == symbol)
            .map(|b| b.raw)
    }
}

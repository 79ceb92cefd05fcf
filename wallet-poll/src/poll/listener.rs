use alloy_primitives::U256;

use crate::domain::fees::FeeEstimate;
use crate::error::PollError;
use crate::types::{Currency, CurrencyId, Network};

/// Result of one merged balance cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub chain_id: u64,
    pub seq: u64,
    pub trace_id: String,
    /// Values that changed in this cycle.
    pub changed: Vec<(Currency, U256)>,
    /// Items whose call reverted or could not be decoded. Their previous
    /// balance is kept.
    pub failures: Vec<(CurrencyId, PollError)>,
}

impl BalanceUpdate {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.failures.is_empty()
    }
}

pub trait PollListener: Send + Sync {
    fn on_balances_changed(&self, _update: &BalanceUpdate) {}

    fn on_fee_updated(&self, _network: &Network, _estimate: &FeeEstimate) {}

    fn on_poll_failed(&self, _network: &Network, _error: &PollError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

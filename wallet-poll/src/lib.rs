//! Batched on-chain reads for a wallet: balances, allowances, token metadata
//! and base fees through Multicall3 `aggregate3`, merged into wallet state
//! that presenters read through listeners and snapshots.

pub mod abi;
pub mod codec;
pub mod domain;
pub mod error;
pub mod infra;
pub mod poll;
pub mod types;

pub use crate::error::{PollError, Result};
pub use crate::infra::config::PollConfig;
pub use crate::infra::multicall::{BatchReport, CallDescriptor, CallResult, MulticallAggregator};
pub use crate::infra::networks::NetworkRegistry;
pub use crate::infra::rpc::{JsonRpcProvider, Provider};
pub use crate::infra::store::{CurrencyStore, MemoryCurrencyStore};
pub use crate::poll::listener::{BalanceUpdate, ListenerId, PollListener};
pub use crate::poll::request::{FnPollRequest, GroupPollRequest, PollRequest, RequestMeta};
pub use crate::poll::service::{PollHandle, PollService};
pub use crate::poll::state::{PollStatus, WalletSnapshot};
pub use crate::types::{Currency, CurrencyId, Network};

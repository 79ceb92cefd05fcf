use std::collections::BTreeMap;

use crate::error::{PollError, Result};
use crate::types::{Currency, Network, MULTICALL3_ADDRESS};

/// Chain id to network lookup. Networks are immutable once registered.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, Network>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (chain_id, name, native_name, native_symbol, coin_gecko_id) in [
            (1, "Ethereum", "Ethereum", "ETH", "ethereum"),
            (25, "Cronos", "Cronos", "CRO", "crypto-com-chain"),
            (56, "BNB Chain", "BNB", "BNB", "binancecoin"),
            (137, "Polygon", "Polygon Ecosystem Token", "POL", "polygon-ecosystem-token"),
            (42161, "Arbitrum One", "Ethereum", "ETH", "ethereum"),
        ] {
            registry.register(Network::new(
                chain_id,
                name,
                Currency::native(native_name, native_symbol, 18, Some(coin_gecko_id)),
                MULTICALL3_ADDRESS,
            ));
        }
        registry
    }

    /// Replaces any network already registered under the same chain id.
    pub fn register(&mut self, network: Network) {
        self.networks.insert(network.chain_id, network);
    }

    pub fn get(&self, chain_id: u64) -> Result<&Network> {
        self.networks
            .get(&chain_id)
            .ok_or(PollError::UnknownNetwork(chain_id))
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }
}

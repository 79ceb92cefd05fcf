use std::collections::HashMap;

use alloy_primitives::{address, Address, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{PollError, Result};
use crate::types::{self, Currency, CurrencyId, Network};

#[async_trait]
pub trait CurrencyStore: Send + Sync {
    /// Currencies tracked on `network`; the native currency first.
    async fn currencies(&self, network: &Network) -> Result<Vec<Currency>>;

    /// Returns `false` when the currency was already tracked.
    async fn add_currency(&self, network: &Network, currency: Currency) -> Result<bool>;

    async fn cached_balances(
        &self,
        network: &Network,
        wallet: Address,
    ) -> Result<Vec<(CurrencyId, U256)>>;

    async fn save_balances(
        &self,
        network: &Network,
        wallet: Address,
        balances: &[(CurrencyId, U256)],
    ) -> Result<()>;
}

type TokenRow = (u64, &'static str, &'static str, u8, Address, Option<&'static str>);

const DEFAULT_TOKENS: &[TokenRow] = &[
    (
        1,
        "Cult DAO",
        "CULT",
        18,
        address!("f0f9d895aca5c8678f706fb8216fa22957685a13"),
        Some("cult-dao"),
    ),
    (
        1,
        "Tether USD",
        "USDT",
        6,
        address!("dac17f958d2ee523a2206206994597c13d831ec7"),
        Some("tether"),
    ),
    (
        25,
        "USD Coin",
        "USDC",
        6,
        address!("c21223249ca28397b4b6541dffaecc539bff0c59"),
        Some("usd-coin"),
    ),
    (
        137,
        "USD Coin",
        "USDC",
        6,
        address!("3c499c542cef5e3811e1192ce70d8cc03d5c3359"),
        Some("usd-coin"),
    ),
];

/// In-process store; the host persists whatever it needs through its own
/// `CurrencyStore`.
#[derive(Default)]
pub struct MemoryCurrencyStore {
    tokens: Mutex<HashMap<u64, Vec<Currency>>>,
    balances: Mutex<HashMap<(u64, Address), HashMap<CurrencyId, U256>>>,
}

impl MemoryCurrencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut tokens: HashMap<u64, Vec<Currency>> = HashMap::new();
        for (chain_id, name, symbol, decimals, address, coin_gecko_id) in DEFAULT_TOKENS {
            tokens.entry(*chain_id).or_default().push(Currency::erc20(
                name,
                symbol,
                *decimals,
                *address,
                *coin_gecko_id,
            ));
        }
        Self {
            tokens: Mutex::new(tokens),
            balances: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CurrencyStore for MemoryCurrencyStore {
    async fn currencies(&self, network: &Network) -> Result<Vec<Currency>> {
        let tokens = self.tokens.lock().await;
        let mut out = vec![network.native_currency.clone()];
        if let Some(list) = tokens.get(&network.chain_id) {
            out.extend(list.iter().cloned());
        }
        Ok(out)
    }

    async fn add_currency(&self, network: &Network, currency: Currency) -> Result<bool> {
        if currency.is_native() {
            return Err(PollError::store("Native currency is implied by the network"));
        }
        let mut tokens = self.tokens.lock().await;
        let list = tokens.entry(network.chain_id).or_default();
        if list.iter().any(|c| c.address == currency.address) {
            return Ok(false);
        }
        list.push(currency);
        Ok(true)
    }

    async fn cached_balances(
        &self,
        network: &Network,
        wallet: Address,
    ) -> Result<Vec<(CurrencyId, U256)>> {
        let balances = self.balances.lock().await;
        let mut out: Vec<(CurrencyId, U256)> = balances
            .get(&(network.chain_id, wallet))
            .map(|m| m.iter().map(|(id, v)| (id.clone(), *v)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn save_balances(
        &self,
        network: &Network,
        wallet: Address,
        balances: &[(CurrencyId, U256)],
    ) -> Result<()> {
        let mut stored = self.balances.lock().await;
        let entry = stored.entry((network.chain_id, wallet)).or_default();
        for (id, value) in balances {
            entry.insert(id.clone(), *value);
        }
        Ok(())
    }
}

/// Finds a currency by contract address or case-insensitive symbol.
pub fn resolve_currency<'a>(currencies: &'a [Currency], query: &str) -> Result<&'a Currency> {
    let trimmed = query.trim();
    if trimmed.starts_with("0x") {
        let addr = types::parse_address(trimmed)?;
        return currencies
            .iter()
            .find(|c| c.address == Some(addr))
            .ok_or_else(|| PollError::invalid_params(format!("Unknown currency: {trimmed}")));
    }

    let wanted = trimmed.to_lowercase();
    currencies
        .iter()
        .find(|c| c.symbol.to_lowercase() == wanted)
        .ok_or_else(|| PollError::invalid_params(format!("Unknown currency: {trimmed}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::networks::NetworkRegistry;

    fn ethereum() -> Network {
        NetworkRegistry::with_defaults().get(1).unwrap().clone()
    }

    #[tokio::test]
    async fn native_currency_comes_first() {
        let store = MemoryCurrencyStore::with_defaults();
        let currencies = store.currencies(&ethereum()).await.unwrap();
        let symbols: Vec<&str> = currencies.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETH", "CULT", "USDT"]);
    }

    #[tokio::test]
    async fn add_currency_is_idempotent() {
        let store = MemoryCurrencyStore::new();
        let network = ethereum();
        let token = Currency::erc20("Dai", "DAI", 18, Address::repeat_byte(0x6b), None);
        assert!(store.add_currency(&network, token.clone()).await.unwrap());
        assert!(!store.add_currency(&network, token).await.unwrap());
        assert_eq!(store.currencies(&network).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejects_native_currency() {
        let store = MemoryCurrencyStore::new();
        let network = ethereum();
        let err = store
            .add_currency(&network, network.native_currency.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Store(_)));
    }

    #[tokio::test]
    async fn balances_are_scoped_by_wallet() {
        let store = MemoryCurrencyStore::new();
        let network = ethereum();
        let wallet = Address::repeat_byte(0x11);
        let id = network.native_currency.id();
        store
            .save_balances(&network, wallet, &[(id.clone(), U256::from(5u8))])
            .await
            .unwrap();

        assert_eq!(
            store.cached_balances(&network, wallet).await.unwrap(),
            vec![(id, U256::from(5u8))]
        );
        assert!(store
            .cached_balances(&network, Address::repeat_byte(0x22))
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn resolves_by_symbol_or_address() {
        let currencies = vec![
            Currency::native("Ethereum", "ETH", 18, None),
            Currency::erc20("Tether USD", "USDT", 6, Address::repeat_byte(0xda), None),
        ];
        assert_eq!(resolve_currency(&currencies, "usdt").unwrap().decimals, 6);
        let by_addr = resolve_currency(&currencies, &Address::repeat_byte(0xda).to_string()).unwrap();
        assert_eq!(by_addr.symbol, "USDT");
        assert!(resolve_currency(&currencies, "DOGE").is_err());
    }
}

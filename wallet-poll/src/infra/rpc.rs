use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PollError, Result};
use crate::infra::config::PollConfig;
use crate::types;

/// Read-only JSON-RPC transport for one chain.
#[async_trait]
pub trait Provider: Send + Sync {
    fn chain_id(&self) -> u64;

    /// `eth_call` against `target` at the latest block. Any failure to reach
    /// the node or get a result is a `Transport` error.
    async fn call(&self, target: Address, data: Bytes) -> Result<Bytes>;
}

#[derive(Clone)]
pub struct JsonRpcProvider {
    url: String,
    chain_id: u64,
    max_retries: u8,
    timeout: Duration,
    http: reqwest::Client,
}

impl JsonRpcProvider {
    pub fn new(url: &str, chain_id: u64, config: &PollConfig) -> Self {
        Self {
            url: url.trim().to_string(),
            chain_id,
            max_retries: config.rpc_max_retries.max(1),
            timeout: config.rpc_timeout(),
            http: reqwest::Client::new(),
        }
    }

    /// Asks the node for its chain id instead of trusting the caller.
    pub async fn detect(url: &str, config: &PollConfig) -> Result<Self> {
        let mut provider = Self::new(url, 0, config);
        provider.chain_id = provider.eth_chain_id().await?;
        Ok(provider)
    }

    /// Builds a provider from `env_var` (e.g. `ETHEREUM_RPC_URL`); `None` when unset or blank.
    pub fn from_env(env_var: &str, chain_id: u64, config: &PollConfig) -> Option<Self> {
        let url = std::env::var(env_var).ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self::new(&url, chain_id, config))
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let mut last_err: Option<PollError> = None;
        for attempt in 1..=self.max_retries {
            match self.send_with_timeout(&payload).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    log::warn!(
                        "RPC {} attempt {}/{} failed on chain {}: {}",
                        method,
                        attempt,
                        self.max_retries,
                        self.chain_id,
                        err
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PollError::transport("RPC retries exhausted")))
    }

    async fn send_with_timeout(&self, payload: &Value) -> Result<Value> {
        match tokio::time::timeout(self.timeout, self.send(payload)).await {
            Ok(out) => out,
            Err(_elapsed) => Err(PollError::transport(format!(
                "RPC timeout after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn send(&self, payload: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|err| PollError::transport(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PollError::transport(format!("HTTP {status}")));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|err| PollError::transport(err.to_string()))?;
        parse_rpc_response(value)
    }

    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .request(
                "eth_call",
                serde_json::json!([
                    { "to": to.to_string(), "data": types::bytes_to_hex0x(data) },
                    "latest"
                ]),
            )
            .await?;
        let output = result
            .as_str()
            .ok_or_else(|| PollError::transport("eth_call result is not a string"))?;
        types::hex0x_to_bytes(output).map_err(|err| PollError::transport(err.to_string()))
    }

    pub async fn eth_chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", serde_json::json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| PollError::transport("eth_chainId result is not a string"))?;
        let id = types::parse_u256_hex(raw)?;
        u64::try_from(id).map_err(|_| PollError::transport(format!("Chain id out of range: {raw}")))
    }
}

#[async_trait]
impl Provider for JsonRpcProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, target: Address, data: Bytes) -> Result<Bytes> {
        self.eth_call(target, &data).await.map(Bytes::from)
    }
}

fn parse_rpc_response(value: Value) -> Result<Value> {
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown RPC error");
        let code = err.get("code").and_then(|v| v.as_i64());
        return Err(PollError::transport(match code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        }));
    }

    value
        .get("result")
        .cloned()
        .ok_or_else(|| PollError::transport("Missing RPC result"))
}

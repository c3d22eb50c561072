use super::error::ExplorerError;
use alloy_primitives::Address;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One explorer API call: `module` + `action` plus its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerRequest {
    pub module: &'static str,
    pub action: &'static str,
    pub params: Vec<(&'static str, String)>,
}

impl ExplorerRequest {
    pub fn source_code(address: Address) -> Self {
        Self {
            module: "contract",
            action: "getsourcecode",
            params: vec![("address", format!("{address:?}"))],
        }
    }

    pub fn contract_creation(address: Address) -> Self {
        Self {
            module: "contract",
            action: "getcontractcreation",
            params: vec![("contractaddresses", format!("{address:?}"))],
        }
    }

    pub fn transaction_by_hash(tx_hash: &str) -> Self {
        Self {
            module: "proxy",
            action: "eth_getTransactionByHash",
            params: vec![("txhash", tx_hash.to_string())],
        }
    }

    pub fn block_by_number(block_number: u64) -> Self {
        Self {
            module: "proxy",
            action: "eth_getBlockByNumber",
            params: vec![
                ("tag", format!("{block_number:#x}")),
                ("boolean", "false".to_string()),
            ],
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Anything that can answer explorer requests for a single network.
/// Returns the `result` payload of a successful response.
#[async_trait]
pub trait ExplorerTransport: Send + Sync {
    async fn call(&self, request: &ExplorerRequest) -> Result<Value, ExplorerError>;
}

#[async_trait]
impl<T: ExplorerTransport> ExplorerTransport for Arc<T> {
    async fn call(&self, request: &ExplorerRequest) -> Result<Value, ExplorerError> {
        self.as_ref().call(request).await
    }
}

/// Etherscan v2 multichain API client. Rotates across API keys when one gets
/// throttled.
#[derive(Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    chain_id: u64,
    api_keys: Vec<String>,
    current_key: Arc<AtomicUsize>,
}

impl EtherscanClient {
    pub fn new(base_url: &str, chain_id: u64, api_keys: &[String]) -> anyhow::Result<Self> {
        if api_keys.is_empty() {
            return Err(anyhow::anyhow!("At least one explorer API key must be provided"));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(EtherscanClient {
            http,
            base_url: base_url.to_string(),
            chain_id,
            api_keys: api_keys.to_vec(),
            current_key: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn get_api_key(&self) -> &str {
        let index = self.current_key.load(Ordering::Relaxed) % self.api_keys.len();
        &self.api_keys[index]
    }

    pub fn rotate_key(&self) {
        let current = self.current_key.load(Ordering::Relaxed);
        let next = (current + 1) % self.api_keys.len();
        self.current_key.store(next, Ordering::Relaxed);

        if self.api_keys.len() > 1 {
            debug!("Rotating to explorer API key #{}", next);
        }
    }

    async fn send(&self, request: &ExplorerRequest) -> Result<Value, ExplorerError> {
        let mut query: Vec<(&str, String)> = vec![
            ("chainid", self.chain_id.to_string()),
            ("module", request.module.to_string()),
            ("action", request.action.to_string()),
        ];
        query.extend(request.params.iter().map(|(k, v)| (*k, v.clone())));
        query.push(("apikey", self.get_api_key().to_string()));

        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ExplorerError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExplorerError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ExplorerError::Transport(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExplorerError::Decode(e.to_string()))?;

        interpret_response(body)
    }
}

#[async_trait]
impl ExplorerTransport for EtherscanClient {
    async fn call(&self, request: &ExplorerRequest) -> Result<Value, ExplorerError> {
        let result = self.send(request).await;
        if let Err(e) = &result {
            if e.is_rate_limited() {
                warn!(
                    "Explorer throttled {}.{} on chain {}, rotating key",
                    request.module, request.action, self.chain_id
                );
                self.rotate_key();
            }
        }
        result
    }
}

/// Unwraps the two envelope styles the explorer speaks: the REST style
/// `{status, message, result}` and the JSON-RPC style `{jsonrpc, result | error}`
/// used by the `proxy` module.
pub fn interpret_response(body: Value) -> Result<Value, ExplorerError> {
    if let Some(status) = body.get("status").and_then(Value::as_str) {
        let result = body.get("result").cloned().unwrap_or(Value::Null);
        if status == "1" {
            return Ok(result);
        }

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.starts_with("No data found") || result.as_array().is_some_and(|a| a.is_empty())
        {
            return Ok(Value::Array(Vec::new()));
        }

        let detail = match result.as_str() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => message.to_string(),
        };
        return Err(ExplorerError::from_message(detail));
    }

    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ExplorerError::from_message(message));
    }

    body.get("result")
        .cloned()
        .ok_or_else(|| ExplorerError::Decode(format!("response has no result: {body}")))
}

use super::cache::BlockTimestampCache;
use super::source::extract_source_text;
use super::types::{CreationEntry, CreationInfo, DeploymentTime, EnrichmentResult, SourceCodeEntry};
use crate::explorer::{ExplorerError, ExplorerRequest, ExplorerTransport};
use crate::retry::RetryPolicy;
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capability to turn a contract address into explorer metadata.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, address: Address) -> Result<EnrichmentResult>;
}

/// Runs the getsourcecode → (implementation) → creation → tx → block
/// protocol against one network's explorer.
pub struct ExplorerEnricher<T> {
    network: String,
    transport: T,
    retry: RetryPolicy,
    cache: Arc<BlockTimestampCache>,
}

impl<T: ExplorerTransport> ExplorerEnricher<T> {
    pub fn new(network: &str, transport: T, retry: RetryPolicy) -> Self {
        Self {
            network: network.to_string(),
            transport,
            retry,
            cache: Arc::new(BlockTimestampCache::new()),
        }
    }

    /// Shares a timestamp cache with other enrichers of the same run.
    pub fn with_cache(mut self, cache: Arc<BlockTimestampCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &BlockTimestampCache {
        &self.cache
    }

    async fn call(&self, request: ExplorerRequest) -> Result<Value, ExplorerError> {
        let label = format!("{}.{} on {}", request.module, request.action, self.network);
        let request = &request;
        let transport = &self.transport;

        self.retry
            .run(
                &label,
                move || transport.call(request),
                ExplorerError::is_rate_limited,
            )
            .await
    }

    async fn fetch_source_entry(&self, address: Address) -> Result<SourceCodeEntry> {
        let result = self.call(ExplorerRequest::source_code(address)).await?;
        let first = result
            .as_array()
            .and_then(|entries| entries.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("getsourcecode returned no entries for {:?}", address))?;

        serde_json::from_value(first)
            .with_context(|| format!("Malformed getsourcecode entry for {address:?}"))
    }

    async fn fetch_creation(&self, address: Address) -> Result<Option<CreationInfo>> {
        let result = self.call(ExplorerRequest::contract_creation(address)).await?;
        let Some(first) = result.as_array().and_then(|entries| entries.first()).cloned() else {
            return Ok(None);
        };

        let entry: CreationEntry = serde_json::from_value(first)
            .with_context(|| format!("Malformed getcontractcreation entry for {address:?}"))?;
        Ok(entry.into_info())
    }

    async fn fetch_block_number(&self, tx_hash: B256) -> Result<u64> {
        let tx = self
            .call(ExplorerRequest::transaction_by_hash(&format!("{tx_hash:?}")))
            .await?;
        tx.get("blockNumber")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .ok_or_else(|| anyhow::anyhow!("Transaction {:?} has no block number", tx_hash))
    }

    async fn fetch_block_timestamp(&self, block_number: u64) -> Result<u64> {
        self.cache
            .get_or_fetch(&self.network, block_number, || async {
                let block = self
                    .call(ExplorerRequest::block_by_number(block_number))
                    .await?;
                let timestamp = block
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_hex_u64)
                    .ok_or_else(|| anyhow::anyhow!("Block {} has no timestamp", block_number))?;
                Ok::<u64, anyhow::Error>(timestamp)
            })
            .await
    }

    async fn resolve_deployment(&self, tx_hash: B256) -> Result<DeploymentTime> {
        let block_number = self.fetch_block_number(tx_hash).await?;
        let timestamp = self.fetch_block_timestamp(block_number).await?;
        Ok(DeploymentTime::Precise {
            block_number,
            timestamp,
        })
    }
}

#[async_trait]
impl<T: ExplorerTransport> Enricher for ExplorerEnricher<T> {
    async fn enrich(&self, address: Address) -> Result<EnrichmentResult> {
        let own = self
            .fetch_source_entry(address)
            .await
            .with_context(|| format!("Source lookup failed for {address:?} on {}", self.network))?;

        let mut result = EnrichmentResult {
            address,
            verified: own.is_verified(),
            contract_name: own.contract_name(),
            ..Default::default()
        };

        if own.is_proxy() {
            result.is_proxy = true;
            result.proxy_contract_name = own.contract_name();
            result.implementation_address = own.implementation();

            // Single hop: the implementation's own proxy flag is ignored.
            if let Some(implementation) = result.implementation_address.filter(|a| *a != address)
            {
                match self.fetch_source_entry(implementation).await {
                    Ok(entry) => result.implementation_contract_name = entry.contract_name(),
                    Err(e) => warn!(
                        "Implementation lookup failed for proxy {:?} -> {:?}: {:#}",
                        address, implementation, e
                    ),
                }
            }

            if result.implementation_contract_name.is_some() {
                result.contract_name = result.implementation_contract_name.clone();
            }
        }

        if result.verified {
            result.source = extract_source_text(Some(&own.source_code))
                .map(|text| own.compiler_settings(text));
        }

        result.creation = match self.fetch_creation(address).await {
            Ok(creation) => creation,
            Err(e) => {
                warn!("Creation lookup failed for {:?}: {:#}", address, e);
                None
            }
        };

        if let Some(creation) = &result.creation {
            result.deployment = match self.resolve_deployment(creation.tx_hash).await {
                Ok(deployment) => deployment,
                Err(e) => {
                    warn!(
                        "Deployment time unresolved for {:?} (tx {:?}): {:#}",
                        address, creation.tx_hash, e
                    );
                    DeploymentTime::Unknown
                }
            };
        }

        debug!(
            "Enriched {:?}: verified={} name={:?} proxy={} deployment={:?}",
            address, result.verified, result.contract_name, result.is_proxy, result.deployment
        );

        Ok(result)
    }
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::types::Confidence;
    use serde_json::json;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;

    type Handler = dyn Fn(&ExplorerRequest) -> Result<Value, ExplorerError> + Send + Sync;

    struct MockExplorer {
        handler: Box<Handler>,
        calls: Mutex<HashMap<&'static str, usize>>,
    }

    impl MockExplorer {
        fn new(
            handler: impl Fn(&ExplorerRequest) -> Result<Value, ExplorerError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, action: &str) -> usize {
            self.calls.lock().unwrap().get(action).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ExplorerTransport for MockExplorer {
        async fn call(&self, request: &ExplorerRequest) -> Result<Value, ExplorerError> {
            *self.calls.lock().unwrap().entry(request.action).or_insert(0) += 1;
            (self.handler)(request)
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn tx(byte: u8) -> String {
        format!("{:?}", B256::repeat_byte(byte))
    }

    fn requested_address(request: &ExplorerRequest) -> Address {
        let raw = request
            .param("address")
            .or_else(|| request.param("contractaddresses"))
            .unwrap();
        Address::from_str(raw).unwrap()
    }

    fn source_entry(name: &str, proxy: bool, implementation: Option<Address>) -> Value {
        let source = if name.is_empty() {
            String::new()
        } else {
            format!("contract {name} {{}}")
        };
        let proxy_flag = if proxy { "1" } else { "0" };
        let implementation = implementation
            .map(|a| format!("{a:?}"))
            .unwrap_or_default();

        json!([{
            "SourceCode": source,
            "ABI": "[]",
            "ContractName": name,
            "CompilerVersion": "v0.8.20+commit.a1b79de6",
            "OptimizationUsed": "1",
            "Runs": "200",
            "Proxy": proxy_flag,
            "Implementation": implementation,
        }])
    }

    /// Answers creation/tx/block lookups the same way for every address.
    fn chain_response(request: &ExplorerRequest) -> Result<Value, ExplorerError> {
        match request.action {
            "getcontractcreation" => Ok(json!([{
                "contractAddress": format!("{:?}", requested_address(request)),
                "contractCreator": format!("{:?}", addr(0xde)),
                "txHash": tx(0xaa),
            }])),
            "eth_getTransactionByHash" => Ok(json!({"blockNumber": "0x10"})),
            "eth_getBlockByNumber" => Ok(json!({"timestamp": "0x65f2f900"})),
            other => Err(ExplorerError::Api(format!("unhandled {other}"))),
        }
    }

    fn enricher(mock: Arc<MockExplorer>) -> ExplorerEnricher<Arc<MockExplorer>> {
        ExplorerEnricher::new("ethereum", mock, RetryPolicy::immediate(5))
    }

    #[tokio::test]
    async fn test_verified_non_proxy() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Ok(source_entry("TokenA", false, None)),
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(addr(0x11)).await.unwrap();

        assert!(result.verified);
        assert_eq!(result.contract_name.as_deref(), Some("TokenA"));
        assert!(!result.is_proxy);
        assert_eq!(result.proxy_contract_name, None);
        assert_eq!(result.confidence(), Some(Confidence::Precise));
        assert_eq!(
            result.deployment,
            DeploymentTime::Precise {
                block_number: 16,
                timestamp: 0x65f2f900
            }
        );
        assert!(result.deployment.iso_date().unwrap().ends_with('Z'));
        assert_eq!(result.creation.unwrap().deployer, Some(addr(0xde)));

        let source = result.source.unwrap();
        assert_eq!(source.source_code, "contract TokenA {}");
        assert_eq!(source.runs, Some(200));
        assert_eq!(mock.calls("getsourcecode"), 1);
    }

    #[tokio::test]
    async fn test_unverified_still_gets_deployment() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Ok(source_entry("", false, None)),
            _ => chain_response(req),
        }));

        let result = enricher(mock).enrich(addr(0x22)).await.unwrap();

        assert!(!result.verified);
        assert_eq!(result.contract_name, None);
        assert_eq!(result.source, None);
        assert_eq!(result.confidence(), Some(Confidence::Precise));
        assert!(result.creation.is_some());
    }

    #[tokio::test]
    async fn test_proxy_takes_implementation_name() {
        let proxy = addr(0x33);
        let implementation = addr(0x44);
        let mock = Arc::new(MockExplorer::new(move |req| match req.action {
            "getsourcecode" if requested_address(req) == proxy => Ok(source_entry(
                "TransparentUpgradeableProxy",
                true,
                Some(implementation),
            )),
            "getsourcecode" => Ok(source_entry("VaultImpl", false, None)),
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(proxy).await.unwrap();

        assert!(result.is_proxy);
        assert_eq!(result.implementation_address, Some(implementation));
        assert_eq!(result.contract_name.as_deref(), Some("VaultImpl"));
        assert_eq!(
            result.proxy_contract_name.as_deref(),
            Some("TransparentUpgradeableProxy")
        );
        assert_eq!(result.implementation_contract_name.as_deref(), Some("VaultImpl"));
        assert_eq!(
            result.source.unwrap().source_code,
            "contract TransparentUpgradeableProxy {}"
        );
        assert_eq!(mock.calls("getsourcecode"), 2);
    }

    #[tokio::test]
    async fn test_proxy_chain_is_followed_once() {
        let proxy = addr(0x33);
        let implementation = addr(0x44);
        let mock = Arc::new(MockExplorer::new(move |req| match req.action {
            "getsourcecode" if requested_address(req) == proxy => {
                Ok(source_entry("OuterProxy", true, Some(implementation)))
            }
            "getsourcecode" => Ok(source_entry("InnerProxy", true, Some(addr(0x55)))),
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(proxy).await.unwrap();

        assert_eq!(result.contract_name.as_deref(), Some("InnerProxy"));
        assert_eq!(mock.calls("getsourcecode"), 2);
    }

    #[tokio::test]
    async fn test_proxy_without_resolvable_implementation_keeps_own_name() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" if requested_address(req) == addr(0x33) => {
                Ok(source_entry("ERC1967Proxy", true, Some(addr(0x44))))
            }
            "getsourcecode" => Err(ExplorerError::Api("boom".to_string())),
            _ => chain_response(req),
        }));

        let result = enricher(mock).enrich(addr(0x33)).await.unwrap();

        assert!(result.is_proxy);
        assert_eq!(result.contract_name.as_deref(), Some("ERC1967Proxy"));
        assert_eq!(result.proxy_contract_name.as_deref(), Some("ERC1967Proxy"));
        assert_eq!(result.implementation_contract_name, None);
    }

    #[tokio::test]
    async fn test_rate_limited_call_retried_until_success() {
        let seen = Arc::new(Mutex::new(0usize));
        let mock = Arc::new(MockExplorer::new(move |req| match req.action {
            "getsourcecode" => {
                let mut n = seen.lock().unwrap();
                *n += 1;
                if *n < 3 {
                    Err(ExplorerError::RateLimited("Max rate limit reached".to_string()))
                } else {
                    Ok(source_entry("RateLimitedContract", false, None))
                }
            }
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(addr(0x55)).await.unwrap();

        assert!(result.verified);
        assert_eq!(result.contract_name.as_deref(), Some("RateLimitedContract"));
        assert_eq!(mock.calls("getsourcecode"), 3);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_propagates_without_retry() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Err(ExplorerError::Api("Invalid API Key".to_string())),
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(addr(0x56)).await;

        assert!(result.is_err());
        assert_eq!(mock.calls("getsourcecode"), 1);
        assert_eq!(mock.calls("getcontractcreation"), 0);
    }

    #[tokio::test]
    async fn test_shared_creation_block_is_looked_up_once() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Ok(source_entry("CacheTest", false, None)),
            _ => chain_response(req),
        }));
        let enricher = enricher(mock.clone());

        enricher.enrich(addr(0x66)).await.unwrap();
        enricher.enrich(addr(0x77)).await.unwrap();

        assert_eq!(mock.calls("eth_getTransactionByHash"), 2);
        assert_eq!(mock.calls("eth_getBlockByNumber"), 1);
        assert_eq!(enricher.cache().get("ethereum", 16), Some(0x65f2f900));
    }

    #[tokio::test]
    async fn test_no_creation_tx_leaves_deployment_unknown() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Ok(source_entry("Genesis", false, None)),
            "getcontractcreation" => Ok(json!([])),
            _ => chain_response(req),
        }));

        let result = enricher(mock.clone()).enrich(addr(0x88)).await.unwrap();

        assert_eq!(result.creation, None);
        assert_eq!(result.deployment, DeploymentTime::Unknown);
        assert_eq!(result.confidence(), None);
        assert_eq!(mock.calls("eth_getTransactionByHash"), 0);
    }

    #[tokio::test]
    async fn test_failed_block_lookup_is_partial_not_substituted() {
        let mock = Arc::new(MockExplorer::new(|req| match req.action {
            "getsourcecode" => Ok(source_entry("Token", false, None)),
            "eth_getBlockByNumber" => Ok(Value::Null),
            _ => chain_response(req),
        }));

        let result = enricher(mock).enrich(addr(0x99)).await.unwrap();

        assert!(result.creation.is_some());
        assert_eq!(result.deployment, DeploymentTime::Unknown);
        assert_eq!(result.deployment.timestamp(), None);
        assert_eq!(result.confidence(), Some(Confidence::Partial));
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x10"), Some(16));
        assert_eq!(parse_hex_u64("ff"), Some(255));
        assert_eq!(parse_hex_u64("0x"), None);
        assert_eq!(parse_hex_u64("0xzz"), None);
    }
}

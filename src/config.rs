use crate::retry::RetryPolicy;
use crate::revalidation::SweepConfig;
use alloy_primitives::B256;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_EXPLORER_API_URL: &str = "https://api.etherscan.io/v2/api";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./catalog.db";

/// Rate-limited explorer calls get at least this many attempts.
pub const MIN_EXPLORER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub networks: Vec<NetworkConfig>,
    pub explorer_api_url: String,
    pub explorer_api_keys: Vec<String>,
    pub explorer_retry: RetryPolicy,
    pub probe_concurrency: usize,
    pub probe_rounds: usize,
    /// Code hashes that mark an account as self-destroyed.
    pub destroyed_code_hashes: Vec<B256>,
    pub sweep: SweepConfig,
}

/// Chain ids of networks the explorer serves, used when `<NETWORK>_CHAIN_ID`
/// is not set.
pub fn known_chain_id(network: &str) -> Option<u64> {
    let id = match network {
        "ethereum" | "mainnet" => 1,
        "optimism" => 10,
        "bsc" => 56,
        "gnosis" => 100,
        "polygon" => 137,
        "zksync" => 324,
        "base" => 8453,
        "arbitrum" => 42161,
        "avalanche" => 43114,
        "linea" => 59144,
        "blast" => 81457,
        "scroll" => 534352,
        "sepolia" => 11155111,
        _ => return None,
    };
    Some(id)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = database_url_from(&var);

        let network_names = split_list(&var("NETWORKS").unwrap_or_else(|| "ethereum".to_string()));
        let mut networks = Vec::with_capacity(network_names.len());
        for name in network_names {
            let name = name.to_lowercase();
            let prefix = name.to_uppercase();

            let rpc_urls = var(&format!("{prefix}_RPC_URLS"))
                .map(|v| split_list(&v))
                .unwrap_or_default();
            if rpc_urls.is_empty() {
                return Err(anyhow::anyhow!("{}_RPC_URLS must be set in .env", prefix));
            }

            let chain_id = match var(&format!("{prefix}_CHAIN_ID")) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid {prefix}_CHAIN_ID: {raw}"))?,
                None => known_chain_id(&name).with_context(|| {
                    format!("{prefix}_CHAIN_ID must be set for unknown network {name}")
                })?,
            };

            networks.push(NetworkConfig {
                name,
                chain_id,
                rpc_urls,
            });
        }

        let explorer_api_keys = var("ETHERSCAN_API_KEYS")
            .or_else(|| var("ETHERSCAN_API_KEY"))
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if explorer_api_keys.is_empty() {
            return Err(anyhow::anyhow!(
                "ETHERSCAN_API_KEYS or ETHERSCAN_API_KEY must be set in .env"
            ));
        }

        let explorer_api_url =
            var("ETHERSCAN_API_URL").unwrap_or_else(|| DEFAULT_EXPLORER_API_URL.to_string());

        let max_attempts: usize = parse_or(&var, "EXPLORER_MAX_ATTEMPTS", 5)?;
        if max_attempts < MIN_EXPLORER_ATTEMPTS {
            return Err(anyhow::anyhow!(
                "EXPLORER_MAX_ATTEMPTS must be at least {}, got {}",
                MIN_EXPLORER_ATTEMPTS,
                max_attempts
            ));
        }
        let backoff_ms: u64 = parse_or(&var, "EXPLORER_BACKOFF_MS", 500)?;
        let explorer_retry = RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms));

        let destroyed_code_hashes = match var("DESTROYED_CODE_HASHES") {
            Some(raw) => split_list(&raw)
                .iter()
                .map(|h| B256::from_str(h).with_context(|| format!("Invalid code hash: {h}")))
                .collect::<Result<Vec<_>>>()?,
            None => vec![B256::ZERO],
        };

        let defaults = SweepConfig::default();
        let sweep = SweepConfig {
            batch_size: parse_or(&var, "REVALIDATION_BATCH_SIZE", defaults.batch_size)?,
            selection_limit: parse_or(&var, "REVALIDATION_LIMIT", defaults.selection_limit)?,
            batch_pause: Duration::from_millis(parse_or(&var, "BATCH_PAUSE_MS", 1000)?),
            max_duration: Duration::from_secs(parse_or(&var, "SWEEP_TIMEOUT_SECS", 7200)?),
            ..defaults
        };

        Ok(Config {
            database_url,
            networks,
            explorer_api_url,
            explorer_api_keys,
            explorer_retry,
            probe_concurrency: parse_or(&var, "PROBE_CONCURRENCY", 8)?,
            probe_rounds: parse_or(&var, "PROBE_ROUNDS", 3)?,
            destroyed_code_hashes,
            sweep,
        })
    }

    /// `DATABASE_URL` alone, for tools that need no network or explorer
    /// settings.
    pub fn database_url() -> String {
        dotenv::dotenv().ok();
        database_url_from(&|key: &str| std::env::var(key).ok())
    }

    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name.eq_ignore_ascii_case(name))
    }
}

fn database_url_from<V>(var: &V) -> String
where
    V: Fn(&str) -> Option<String>,
{
    var("DATABASE_URL")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}: {raw}")),
        None => Ok(default),
    }
}

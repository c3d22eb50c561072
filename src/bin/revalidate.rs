use anyhow::Result;
use clap::Parser;
use contract_catalog::classifier::BytecodeClassifier;
use contract_catalog::config::{Config, NetworkConfig};
use contract_catalog::enrichment::{BlockTimestampCache, ExplorerEnricher};
use contract_catalog::explorer::EtherscanClient;
use contract_catalog::repository::Database;
use contract_catalog::revalidation::{Revalidator, SweepStats};
use contract_catalog::rpc::RpcClient;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "revalidate")]
#[command(about = "Re-check incomplete catalog records against chain and explorer", long_about = None)]
struct Cli {
    /// Only sweep these networks (repeatable). Defaults to every configured network.
    #[arg(long)]
    network: Vec<String>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,
}

async fn sweep_network(
    config: &Config,
    network: &NetworkConfig,
    cache: Arc<BlockTimestampCache>,
) -> Result<SweepStats> {
    let db = Database::new(&config.database_url)?;

    let rpc = RpcClient::new(&network.rpc_urls)?;
    let classifier = BytecodeClassifier::new(rpc, config.destroyed_code_hashes.iter().copied())
        .with_concurrency(config.probe_concurrency)
        .with_rounds(config.probe_rounds);

    let explorer = EtherscanClient::new(
        &config.explorer_api_url,
        network.chain_id,
        &config.explorer_api_keys,
    )?;
    let enricher = ExplorerEnricher::new(&network.name, explorer, config.explorer_retry.clone())
        .with_cache(cache);

    info!(
        "[{}] Sweeping chain {} with {} RPC endpoint(s)",
        network.name,
        network.chain_id,
        network.rpc_urls.len()
    );

    Revalidator::new(&network.name, db, classifier, enricher, config.sweep.clone())
        .run()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(limit) = cli.limit {
        config.sweep.selection_limit = limit;
    }
    if let Some(batch_size) = cli.batch_size {
        config.sweep.batch_size = batch_size;
    }
    info!("Configuration loaded");

    let networks: Vec<NetworkConfig> = if cli.network.is_empty() {
        config.networks.clone()
    } else {
        cli.network
            .iter()
            .map(|name| {
                config
                    .network(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Network {} is not configured", name))
            })
            .collect::<Result<_>>()?
    };

    let cache = Arc::new(BlockTimestampCache::new());
    let sweeps = networks
        .iter()
        .map(|network| sweep_network(&config, network, cache.clone()));
    let results = join_all(sweeps).await;

    let mut failed = 0;
    for (network, result) in networks.iter().zip(results) {
        match result {
            Ok(stats) => info!(
                "[{}] selected={} processed={} verified={} deleted={} skipped={} failed_batches={}",
                network.name,
                stats.selected,
                stats.processed,
                stats.verified,
                stats.deleted,
                stats.skipped,
                stats.failed_batches
            ),
            Err(e) => {
                error!("[{}] Sweep aborted: {:#}", network.name, e);
                failed += 1;
            }
        }
    }

    info!("Cached {} block timestamps", cache.len());

    if failed > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} network sweeps failed",
            failed,
            networks.len()
        ));
    }

    Ok(())
}

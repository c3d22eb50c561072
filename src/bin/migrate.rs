use anyhow::{Context, Result};
use contract_catalog::config::Config;
use contract_catalog::repository::{AddressRepository, Database};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = Config::database_url();
    info!("Creating catalog schema in {}", database_url);

    let db = Database::new(&database_url)
        .with_context(|| format!("Failed to open catalog database {database_url}"))?;

    let networks = AddressRepository::new(&db.conn).network_stats(None)?;
    if networks.is_empty() {
        println!("Schema ready; catalog is empty.");
    }
    for stats in networks {
        println!("Schema ready; {} holds {} addresses.", stats.network, stats.total);
    }

    Ok(())
}

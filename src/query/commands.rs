use crate::query::formatters::{format_record, format_stats};
use crate::repository::{AddressRepository, SourceRepository};
use alloy_primitives::Address;
use anyhow::Result;
use std::str::FromStr;
use tracing::info;

pub fn cmd_stats(repo: &AddressRepository, network: Option<&str>) -> Result<()> {
    let stats = repo.network_stats(network)?;
    let output = format_stats(&stats);
    println!("{output}");

    Ok(())
}

pub fn cmd_show(
    address_repo: &AddressRepository,
    source_repo: &SourceRepository,
    network: &str,
    address: &str,
) -> Result<()> {
    let address = Address::from_str(address)
        .map_err(|_| anyhow::anyhow!("Invalid address format: {}", address))?;

    let Some(record) = address_repo.get(network, &address)? else {
        println!("{address:?} is not catalogued on {network}.");
        return Ok(());
    };

    let source = source_repo.get(network, &address)?;
    let output = format_record(&record, source.as_ref());
    println!("{output}");

    Ok(())
}

/// Removes records the catalog should not hold. Only counts them unless
/// `execute` is set. Returns the number of matching records.
pub fn cmd_purge(repo: &AddressRepository, network: Option<&str>, execute: bool) -> Result<usize> {
    let scope = network.unwrap_or("all networks");
    let candidates = repo.count_purgeable(network)?;

    if !execute {
        println!("{candidates} records on {scope} would be purged. Re-run with --execute to delete them.");
        return Ok(candidates);
    }

    let deleted = repo.purge(network)?;
    info!("Purged {} records on {}", deleted, scope);
    println!("Purged {deleted} records on {scope}.");

    Ok(deleted)
}

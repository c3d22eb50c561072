use crate::classifier::{ClassifiedContract, Classifier};
use crate::enrichment::{Confidence, EnrichmentResult, Enricher};
use crate::repository::{
    AddressRecord, AddressRepository, Database, SourceRecord, SourceRepository, Tag,
};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Addresses classified and enriched together.
    pub batch_size: usize,
    /// Upper bound on records selected per sweep.
    pub selection_limit: usize,
    pub batch_pause: Duration,
    /// No new batch starts after this much time has passed.
    pub max_duration: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            selection_limit: 100_000,
            batch_pause: Duration::from_secs(1),
            max_duration: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub selected: usize,
    pub processed: usize,
    pub eoas: usize,
    pub contracts: usize,
    pub self_destroyed: usize,
    pub unclassified: usize,
    /// Verified contracts stored with their source.
    pub verified: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed_batches: usize,
}

impl SweepStats {
    fn absorb(&mut self, batch: &SweepStats) {
        self.eoas += batch.eoas;
        self.contracts += batch.contracts;
        self.self_destroyed += batch.self_destroyed;
        self.unclassified += batch.unclassified;
        self.verified += batch.verified;
        self.deleted += batch.deleted;
        self.skipped += batch.skipped;
    }
}

/// Pending writes for one resolved batch.
#[derive(Debug, Default)]
struct BatchOutcome {
    stats: SweepStats,
    delete: Vec<Address>,
    upsert: Vec<AddressRecord>,
    sources: Vec<SourceRecord>,
}

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Re-checks incomplete or suspect records of one network and either
/// completes them or removes them from the catalog.
pub struct Revalidator<C, E> {
    network: String,
    db: Database,
    classifier: C,
    enricher: E,
    config: SweepConfig,
    clock: fn() -> u64,
}

impl<C: Classifier, E: Enricher> Revalidator<C, E> {
    pub fn new(network: &str, db: Database, classifier: C, enricher: E, config: SweepConfig) -> Self {
        Self {
            network: network.to_string(),
            db,
            classifier,
            enricher,
            config,
            clock: unix_now,
        }
    }

    /// Source of `last_updated`/`fetched_at` timestamps.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub async fn run(&self) -> Result<SweepStats> {
        let started = Instant::now();

        let records = AddressRepository::new(&self.db.conn)
            .select_for_revalidation(&self.network, self.config.selection_limit)
            .with_context(|| format!("Failed to select {} records for revalidation", self.network))?;

        let mut stats = SweepStats {
            selected: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            info!("[{}] Nothing to revalidate", self.network);
            return Ok(stats);
        }

        let mut funded = records.iter().filter_map(|r| r.fund);
        if let Some(top) = funded.next() {
            let bottom = funded.last().unwrap_or(top);
            info!("[{}] Fund range of selection: {} .. {}", self.network, top, bottom);
        }

        let batch_size = self.config.batch_size.max(1);
        let total_batches = records.len().div_ceil(batch_size);
        info!(
            "[{}] Revalidating {} records in {} batches",
            self.network,
            records.len(),
            total_batches
        );

        for (index, batch) in records.chunks(batch_size).enumerate() {
            if index > 0 {
                sleep(self.config.batch_pause).await;
                if started.elapsed() >= self.config.max_duration {
                    warn!(
                        "[{}] Sweep time budget of {:?} spent, stopping before batch {}/{}",
                        self.network,
                        self.config.max_duration,
                        index + 1,
                        total_batches
                    );
                    break;
                }
            }

            stats.processed += batch.len();
            match self.process_batch(batch).await {
                Ok(batch_stats) => {
                    info!(
                        "[{}] Batch {}/{}: {} EOAs, {} contracts ({} stored), {} self-destroyed, {} unclassified, {} deleted, {} skipped",
                        self.network,
                        index + 1,
                        total_batches,
                        batch_stats.eoas,
                        batch_stats.contracts,
                        batch_stats.verified,
                        batch_stats.self_destroyed,
                        batch_stats.unclassified,
                        batch_stats.deleted,
                        batch_stats.skipped
                    );
                    stats.absorb(&batch_stats);
                }
                Err(e) => {
                    error!(
                        "[{}] Batch {}/{} failed to persist: {:#}",
                        self.network,
                        index + 1,
                        total_batches,
                        e
                    );
                    stats.failed_batches += 1;
                }
            }
        }

        info!(
            "[{}] Sweep finished in {:.1}s: {:?}",
            self.network,
            started.elapsed().as_secs_f64(),
            stats
        );

        Ok(stats)
    }

    async fn process_batch(&self, batch: &[AddressRecord]) -> Result<SweepStats> {
        let outcome = self.resolve_batch(batch).await;
        self.persist(outcome)
    }

    async fn resolve_batch(&self, batch: &[AddressRecord]) -> BatchOutcome {
        let existing: HashMap<Address, &AddressRecord> =
            batch.iter().map(|r| (r.address, r)).collect();
        let addresses: Vec<Address> = batch.iter().map(|r| r.address).collect();
        let now = (self.clock)();

        let classification = self.classifier.classify(&addresses).await;
        let mut outcome = BatchOutcome::default();
        outcome.stats.eoas = classification.eoas.len();
        outcome.stats.contracts = classification.contracts.len();
        outcome.stats.self_destroyed = classification.self_destroyed.len();
        outcome.stats.unclassified = classification.unclassified.len();

        for address in &classification.eoas {
            debug!("[{}] Deleting {:?}: externally owned account", self.network, address);
            outcome.delete.push(*address);
        }

        for address in &classification.unclassified {
            warn!("[{}] Skipping {:?}: bytecode unavailable", self.network, address);
            outcome.stats.skipped += 1;
        }

        for address in &classification.self_destroyed {
            let Some(record) = existing.get(address) else {
                continue;
            };
            let mut record = (*record).clone();
            record.tags = vec![Tag::SelfDestroyed];
            record.last_updated = now;
            debug!("[{}] Marking {:?} self-destroyed", self.network, address);
            outcome.upsert.push(record);
        }

        for contract in &classification.contracts {
            let Some(record) = existing.get(&contract.address) else {
                continue;
            };

            let result = match self.enricher.enrich(contract.address).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        "[{}] Skipping {:?}: enrichment failed: {:#}",
                        self.network, contract.address, e
                    );
                    outcome.stats.skipped += 1;
                    continue;
                }
            };

            match retention_failure(&result) {
                Some(reason) => {
                    debug!(
                        "[{}] Deleting {:?}: {}",
                        self.network, contract.address, reason
                    );
                    outcome.delete.push(contract.address);
                }
                None => {
                    let (address_record, source) = completed_record(record, contract, result, now);
                    outcome.upsert.push(address_record);
                    outcome.sources.push(source);
                    outcome.stats.verified += 1;
                }
            }
        }

        outcome
    }

    /// Writes one batch in a single transaction: deletions, address
    /// records, then sources. Nothing is kept if any step fails.
    fn persist(&self, outcome: BatchOutcome) -> Result<SweepStats> {
        let mut stats = outcome.stats;
        let tx = self.db.conn.unchecked_transaction()?;
        let addresses = AddressRepository::new(&tx);

        stats.deleted = addresses
            .delete_all(&self.network, &outcome.delete)
            .context("Failed to delete addresses")?;

        addresses
            .upsert_all(&outcome.upsert)
            .context("Failed to upsert addresses")?;

        SourceRepository::new(&tx)
            .upsert_all(&outcome.sources)
            .context("Failed to upsert contract sources")?;

        tx.commit().context("Failed to commit batch")?;

        Ok(stats)
    }
}

/// Why an enriched contract is not kept, if it is not.
fn retention_failure(result: &EnrichmentResult) -> Option<&'static str> {
    if !result.verified {
        return Some("source not verified");
    }
    if result
        .contract_name
        .as_deref()
        .is_none_or(|name| name.trim().is_empty())
    {
        return Some("no contract name");
    }
    if result
        .source
        .as_ref()
        .is_none_or(|source| source.source_code.trim().is_empty())
    {
        return Some("no source text");
    }
    None
}

/// Builds the stored form of a retained contract. Balance, first-seen and
/// other fields the sweep does not own are carried over from `existing`.
fn completed_record(
    existing: &AddressRecord,
    contract: &ClassifiedContract,
    result: EnrichmentResult,
    now: u64,
) -> (AddressRecord, SourceRecord) {
    let confidence = match result.confidence() {
        // Keep a resolved deployment rather than downgrading it.
        Some(Confidence::Partial) if existing.deployed_at_timestamp.is_some() => existing.confidence,
        other => other,
    };

    let mut record = existing.clone();
    record.tags = vec![Tag::Contract, Tag::Verified];
    record.code_hash = Some(contract.code_hash);
    record.contract_name = result.contract_name.clone();
    record.verified = true;
    record.is_proxy = result.is_proxy;
    record.implementation_address = result.implementation_address;
    record.proxy_contract_name = result.proxy_contract_name.clone();
    record.implementation_contract_name = result.implementation_contract_name.clone();
    record.deploy_tx_hash = result.creation.as_ref().map(|c| c.tx_hash);
    record.deployer_address = result.creation.as_ref().and_then(|c| c.deployer);
    record.deploy_block_number = result.deployment.block_number();
    record.deployed_at_timestamp = result.deployment.timestamp();
    record.deployed_at = result.deployment.iso_date();
    record.confidence = confidence;
    record.fetched_at = Some(now);
    record.first_seen = existing.first_seen.or(Some(now));
    record.last_updated = now;
    record.name_checked = true;
    record.name_checked_at = Some(now);

    // `retention_failure` already checked the source is present.
    let source = SourceRecord::new(
        existing.address,
        &existing.network,
        result.source.unwrap_or_default(),
    );

    (record, source)
}

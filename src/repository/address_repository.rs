use super::merge::address_upsert_sql;
use super::models::{ADDRESS_COLUMNS, AddressRecord, NetworkStats};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, ToSql, params, params_from_iter};
use std::sync::LazyLock;
use tracing::debug;

pub const DEFAULT_ADDRESS_BATCH_SIZE: usize = 1000;

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const DELETE_CHUNK_SIZE: usize = 500;

static UPSERT_ADDRESS: LazyLock<String> = LazyLock::new(address_upsert_sql);

static SELECT_ADDRESS: LazyLock<String> =
    LazyLock::new(|| format!("SELECT {} FROM addresses", ADDRESS_COLUMNS.join(", ")));

pub struct AddressRepository<'a> {
    conn: &'a Connection,
}

impl<'a> AddressRepository<'a> {
    const HAS_TAG: &'static str =
        "EXISTS (SELECT 1 FROM json_each(addresses.tags) WHERE json_each.value = ?)";

    const NEEDS_REVALIDATION: &'static str = "(
            addresses.tags = '[]'
            OR (
                EXISTS (SELECT 1 FROM json_each(addresses.tags) WHERE json_each.value = 'Contract')
                AND (addresses.code_hash IS NULL OR addresses.deployed_at_timestamp IS NULL)
            )
            OR EXISTS (SELECT 1 FROM json_each(addresses.tags) WHERE json_each.value = 'SelfDestroyed')
        )";

    /// EOAs, unverified contracts and verified contracts without a source row.
    /// Untagged and self-destroyed records are left for the sweep.
    const PURGEABLE: &'static str = "(
            addresses.tags != '[]'
            AND NOT EXISTS (SELECT 1 FROM json_each(addresses.tags) WHERE json_each.value = 'SelfDestroyed')
            AND (
                EXISTS (SELECT 1 FROM json_each(addresses.tags) WHERE json_each.value = 'EOA')
                OR addresses.verified = 0
                OR NOT EXISTS (
                    SELECT 1 FROM contract_sources s
                    WHERE s.address = addresses.address AND s.network = addresses.network
                )
            )
        )";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Merges `records` into the store in chunks of `batch_size`, each chunk
    /// in its own transaction. Returns the number of rows written.
    pub fn upsert_batch(&self, records: &[AddressRecord], batch_size: usize) -> Result<usize> {
        let mut count = 0;

        for chunk in records.chunks(batch_size.max(1)) {
            let tx = self.conn.unchecked_transaction()?;
            count += AddressRepository::new(&tx).upsert_all(chunk)?;
            tx.commit()?;
            debug!("Upserted {} address records", chunk.len());
        }

        Ok(count)
    }

    /// Merges `records` without opening a transaction; the caller owns it.
    pub fn upsert_all(&self, records: &[AddressRecord]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(&UPSERT_ADDRESS)?;
        let mut count = 0;
        for record in records {
            count += stmt.execute(params_from_iter(record.to_values()))?;
        }
        Ok(count)
    }

    /// Removes the given addresses on `network`, one transaction per chunk;
    /// their sources cascade.
    pub fn delete(&self, network: &str, addresses: &[Address]) -> Result<usize> {
        let mut count = 0;

        for chunk in addresses.chunks(DELETE_CHUNK_SIZE) {
            let tx = self.conn.unchecked_transaction()?;
            count += AddressRepository::new(&tx).delete_all(network, chunk)?;
            tx.commit()?;
        }

        Ok(count)
    }

    /// Same as [`Self::delete`] inside a transaction the caller owns.
    pub fn delete_all(&self, network: &str, addresses: &[Address]) -> Result<usize> {
        let mut count = 0;

        for chunk in addresses.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM addresses WHERE network = ? AND address IN ({placeholders})"
            );

            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
            values.push(Value::Text(network.to_string()));
            values.extend(chunk.iter().map(|a| Value::Text(format!("{a:?}"))));

            count += self.conn.execute(&sql, params_from_iter(values))?;
        }

        Ok(count)
    }

    pub fn get(&self, network: &str, address: &Address) -> Result<Option<AddressRecord>> {
        let sql = format!("{} WHERE network = ?1 AND address = ?2", *SELECT_ADDRESS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![network, format!("{address:?}")], Self::row_values)?;

        match rows.next() {
            Some(values) => Ok(Some(AddressRecord::from_values(&values?)?)),
            None => Ok(None),
        }
    }

    /// Records of `network` that are untagged, contracts missing their code
    /// hash or deployment timestamp, or self-destroyed; richest first.
    pub fn select_for_revalidation(&self, network: &str, limit: usize) -> Result<Vec<AddressRecord>> {
        let sql = format!(
            "{} WHERE network = ?1 AND {}
             ORDER BY fund DESC NULLS LAST, address
             LIMIT ?2",
            *SELECT_ADDRESS,
            Self::NEEDS_REVALIDATION
        );
        self.query_records(&sql, params![network, limit as i64])
    }

    /// Per-network counters, for one network or all of them.
    pub fn network_stats(&self, network: Option<&str>) -> Result<Vec<NetworkStats>> {
        let (filter, params) = Self::network_filter(network);
        let sql = format!(
            "SELECT
                addresses.network,
                COUNT(*),
                SUM({eoa}),
                SUM({contract}),
                SUM(addresses.verified),
                SUM({destroyed}),
                SUM(addresses.tags = '[]'),
                SUM(s.address IS NOT NULL),
                SUM(addresses.confidence = 'precise')
             FROM addresses
             LEFT JOIN contract_sources s
               ON s.address = addresses.address AND s.network = addresses.network
             {filter}
             GROUP BY addresses.network
             ORDER BY addresses.network",
            eoa = Self::HAS_TAG.replace('?', "'EOA'"),
            contract = Self::HAS_TAG.replace('?', "'Contract'"),
            destroyed = Self::HAS_TAG.replace('?', "'SelfDestroyed'"),
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let stats = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(NetworkStats {
                    network: row.get(0)?,
                    total: row.get(1)?,
                    eoas: row.get::<_, Option<usize>>(2)?.unwrap_or(0),
                    contracts: row.get::<_, Option<usize>>(3)?.unwrap_or(0),
                    verified: row.get::<_, Option<usize>>(4)?.unwrap_or(0),
                    self_destroyed: row.get::<_, Option<usize>>(5)?.unwrap_or(0),
                    untagged: row.get::<_, Option<usize>>(6)?.unwrap_or(0),
                    with_source: row.get::<_, Option<usize>>(7)?.unwrap_or(0),
                    precise_deployments: row.get::<_, Option<usize>>(8)?.unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    pub fn count_purgeable(&self, network: Option<&str>) -> Result<usize> {
        let (filter, params) = Self::network_filter(network);
        let sql = format!(
            "SELECT COUNT(*) FROM addresses {} {}",
            Self::and_or_where(&filter),
            Self::PURGEABLE
        );
        let count = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// Deletes every record that the catalog is not meant to retain.
    pub fn purge(&self, network: Option<&str>) -> Result<usize> {
        let (filter, params) = Self::network_filter(network);
        let sql = format!(
            "DELETE FROM addresses {} {}",
            Self::and_or_where(&filter),
            Self::PURGEABLE
        );

        let tx = self.conn.unchecked_transaction()?;
        let count = tx.execute(&sql, params_from_iter(params.iter()))?;
        tx.commit()?;
        Ok(count)
    }

    pub fn count(&self, network: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM addresses WHERE network = ?1",
            params![network],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn network_filter(network: Option<&str>) -> (String, Vec<Box<dyn ToSql>>) {
        match network {
            Some(network) => (
                "WHERE addresses.network = ?".to_string(),
                vec![Box::new(network.to_string())],
            ),
            None => (String::new(), Vec::new()),
        }
    }

    fn and_or_where(filter: &str) -> String {
        if filter.is_empty() {
            "WHERE".to_string()
        } else {
            format!("{filter} AND")
        }
    }

    fn row_values(row: &Row) -> rusqlite::Result<Vec<Value>> {
        (0..ADDRESS_COLUMNS.len())
            .map(|i| row.get::<_, Value>(i))
            .collect()
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<AddressRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::row_values)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|values| AddressRecord::from_values(values))
            .collect()
    }
}

use super::models::SourceRecord;
use crate::enrichment::ContractSource;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

pub const DEFAULT_SOURCE_BATCH_SIZE: usize = 50;

pub struct SourceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SourceRepository<'a> {
    const UPSERT_SOURCE: &'static str = "INSERT INTO contract_sources (
            address, network, source_code, source_code_hash, compiler_version,
            optimization_used, runs, abi, contract_file_name, compiler_type,
            evm_version, constructor_arguments, library, license_type, fetched_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, CURRENT_TIMESTAMP)
        ON CONFLICT(address, network) DO UPDATE SET
            source_code = excluded.source_code,
            source_code_hash = excluded.source_code_hash,
            compiler_version = excluded.compiler_version,
            optimization_used = excluded.optimization_used,
            runs = excluded.runs,
            abi = excluded.abi,
            contract_file_name = excluded.contract_file_name,
            compiler_type = excluded.compiler_type,
            evm_version = excluded.evm_version,
            constructor_arguments = excluded.constructor_arguments,
            library = excluded.library,
            license_type = excluded.license_type,
            fetched_at = CURRENT_TIMESTAMP";

    const SELECT_SOURCE: &'static str = "SELECT source_code, compiler_version, optimization_used,
            runs, abi, contract_file_name, compiler_type, evm_version,
            constructor_arguments, library, license_type
        FROM contract_sources WHERE network = ?1 AND address = ?2";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Writes sources in chunks of `batch_size`, one transaction per chunk.
    /// Every column is overwritten on conflict; empty source text is skipped.
    pub fn upsert_batch(&self, sources: &[SourceRecord], batch_size: usize) -> Result<usize> {
        let sources: Vec<&SourceRecord> = sources.iter().filter(|s| has_text(s)).collect();
        let mut count = 0;

        for chunk in sources.chunks(batch_size.max(1)) {
            let tx = self.conn.unchecked_transaction()?;
            count += SourceRepository::new(&tx).write(chunk.iter().copied())?;
            tx.commit()?;
            debug!("Upserted {} contract sources", chunk.len());
        }

        Ok(count)
    }

    /// Writes sources without opening a transaction; the caller owns it.
    pub fn upsert_all(&self, sources: &[SourceRecord]) -> Result<usize> {
        self.write(sources.iter().filter(|s| has_text(s)))
    }

    fn write<'r>(&self, sources: impl Iterator<Item = &'r SourceRecord>) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(Self::UPSERT_SOURCE)?;
        let mut count = 0;

        for record in sources {
            let source = &record.source;
            count += stmt.execute(params![
                format!("{:?}", record.address),
                record.network,
                source.source_code,
                format!("{:?}", record.source_code_hash()),
                source.compiler_version,
                source.optimization_used,
                source.runs,
                source.abi,
                source.contract_file_name,
                source.compiler_type,
                source.evm_version,
                source.constructor_arguments,
                source.library,
                source.license_type,
            ])?;
        }

        Ok(count)
    }

    pub fn get(&self, network: &str, address: &Address) -> Result<Option<ContractSource>> {
        let source = self
            .conn
            .query_row(
                Self::SELECT_SOURCE,
                params![network, format!("{address:?}")],
                |row| {
                    Ok(ContractSource {
                        source_code: row.get(0)?,
                        compiler_version: row.get(1)?,
                        optimization_used: row.get(2)?,
                        runs: row.get(3)?,
                        abi: row.get(4)?,
                        contract_file_name: row.get(5)?,
                        compiler_type: row.get(6)?,
                        evm_version: row.get(7)?,
                        constructor_arguments: row.get(8)?,
                        library: row.get(9)?,
                        license_type: row.get(10)?,
                    })
                },
            )
            .optional()?;

        Ok(source)
    }

    /// Stored keccak256 of the source text.
    pub fn get_hash(&self, network: &str, address: &Address) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row(
                "SELECT source_code_hash FROM contract_sources WHERE network = ?1 AND address = ?2",
                params![network, format!("{address:?}")],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn count(&self, network: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM contract_sources WHERE network = ?1",
            params![network],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn has_text(record: &SourceRecord) -> bool {
    !record.source.source_code.trim().is_empty()
}

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::time::Duration;
use tracing::warn;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {db_path}"))?;

        let db = Database { conn };
        db.configure(true)?;
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Database { conn };
        db.configure(false)?;
        db.create_tables()?;
        Ok(db)
    }

    fn configure(&self, wal: bool) -> Result<()> {
        // Source rows cascade from their address; SQLite needs this per connection.
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;

        if wal {
            let mode: String = self
                .conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!("SQLite refused WAL mode, running with journal_mode={}", mode);
            }
        }

        Ok(())
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS addresses (
                address TEXT NOT NULL,
                network TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                code_hash TEXT,
                contract_name TEXT,
                verified INTEGER NOT NULL DEFAULT 0,
                is_proxy INTEGER NOT NULL DEFAULT 0,
                implementation_address TEXT,
                proxy_contract_name TEXT,
                implementation_contract_name TEXT,
                deploy_tx_hash TEXT,
                deployer_address TEXT,
                deploy_block_number INTEGER,
                deployed_at_timestamp INTEGER,
                deployed_at TEXT,
                confidence TEXT,
                fetched_at INTEGER,
                first_seen INTEGER,
                last_updated INTEGER NOT NULL,
                fund TEXT,
                last_fund_updated INTEGER,
                name_checked INTEGER NOT NULL DEFAULT 0,
                name_checked_at INTEGER,
                PRIMARY KEY (address, network)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contract_sources (
                address TEXT NOT NULL,
                network TEXT NOT NULL,
                source_code TEXT NOT NULL,
                source_code_hash TEXT NOT NULL,
                compiler_version TEXT,
                optimization_used INTEGER,
                runs INTEGER,
                abi TEXT,
                contract_file_name TEXT,
                compiler_type TEXT,
                evm_version TEXT,
                constructor_arguments TEXT,
                library TEXT,
                license_type TEXT,
                fetched_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (address, network),
                FOREIGN KEY (address, network) REFERENCES addresses(address, network)
                    ON DELETE CASCADE
            )",
            [],
        )?;

        // Revalidation walks a network's records richest first
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_addresses_network_fund
             ON addresses(network, fund DESC)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_addresses_code_hash
             ON addresses(code_hash)",
            [],
        )?;

        Ok(())
    }
}

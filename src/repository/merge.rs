use super::models::{ADDRESS_COLUMNS, AddressRecord};
use anyhow::Result;
use rusqlite::types::Value;

/// How an incoming value combines with the stored one on conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Incoming value wins, NULL included.
    OverwriteAlways,
    /// Incoming value wins unless it is NULL.
    KeepIfNewNull,
    /// Stored value wins unless it is NULL.
    CoalesceFirstWins,
    /// Incoming JSON array wins unless it is NULL or empty.
    ReplaceIfNonEmpty,
}

impl MergeStrategy {
    /// `SET` fragment for an `ON CONFLICT ... DO UPDATE` over `table`.
    pub fn set_clause(&self, table: &str, column: &str) -> String {
        match self {
            MergeStrategy::OverwriteAlways => format!("{column} = excluded.{column}"),
            MergeStrategy::KeepIfNewNull => {
                format!("{column} = COALESCE(excluded.{column}, {table}.{column})")
            }
            MergeStrategy::CoalesceFirstWins => {
                format!("{column} = COALESCE({table}.{column}, excluded.{column})")
            }
            MergeStrategy::ReplaceIfNonEmpty => format!(
                "{column} = CASE WHEN excluded.{column} IS NULL OR excluded.{column} IN ('', '[]') \
                 THEN {table}.{column} ELSE excluded.{column} END"
            ),
        }
    }

    /// In-memory twin of `set_clause`.
    pub fn merge(&self, existing: &Value, incoming: &Value) -> Value {
        match self {
            MergeStrategy::OverwriteAlways => incoming.clone(),
            MergeStrategy::KeepIfNewNull => match incoming {
                Value::Null => existing.clone(),
                _ => incoming.clone(),
            },
            MergeStrategy::CoalesceFirstWins => match existing {
                Value::Null => incoming.clone(),
                _ => existing.clone(),
            },
            MergeStrategy::ReplaceIfNonEmpty => match incoming {
                Value::Null => existing.clone(),
                Value::Text(s) if s.is_empty() || s == "[]" => existing.clone(),
                _ => incoming.clone(),
            },
        }
    }
}

/// Merge policy for every non-key column of `addresses`.
pub const ADDRESS_MERGE_POLICY: [(&str, MergeStrategy); 21] = [
    ("tags", MergeStrategy::ReplaceIfNonEmpty),
    ("code_hash", MergeStrategy::KeepIfNewNull),
    ("contract_name", MergeStrategy::KeepIfNewNull),
    ("verified", MergeStrategy::OverwriteAlways),
    ("is_proxy", MergeStrategy::OverwriteAlways),
    ("implementation_address", MergeStrategy::KeepIfNewNull),
    ("proxy_contract_name", MergeStrategy::KeepIfNewNull),
    ("implementation_contract_name", MergeStrategy::KeepIfNewNull),
    ("deploy_tx_hash", MergeStrategy::KeepIfNewNull),
    ("deployer_address", MergeStrategy::KeepIfNewNull),
    ("deploy_block_number", MergeStrategy::KeepIfNewNull),
    ("deployed_at_timestamp", MergeStrategy::KeepIfNewNull),
    ("deployed_at", MergeStrategy::KeepIfNewNull),
    ("confidence", MergeStrategy::KeepIfNewNull),
    ("fetched_at", MergeStrategy::KeepIfNewNull),
    ("first_seen", MergeStrategy::CoalesceFirstWins),
    ("last_updated", MergeStrategy::OverwriteAlways),
    ("fund", MergeStrategy::OverwriteAlways),
    ("last_fund_updated", MergeStrategy::OverwriteAlways),
    ("name_checked", MergeStrategy::OverwriteAlways),
    ("name_checked_at", MergeStrategy::OverwriteAlways),
];

/// Upsert statement for `addresses`, generated from `ADDRESS_MERGE_POLICY`.
pub fn address_upsert_sql() -> String {
    let placeholders = (1..=ADDRESS_COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = ADDRESS_MERGE_POLICY
        .iter()
        .map(|(column, strategy)| strategy.set_clause("addresses", column))
        .collect::<Vec<_>>()
        .join(",\n    ");

    format!(
        "INSERT INTO addresses ({}) VALUES ({})\nON CONFLICT(address, network) DO UPDATE SET\n    {}",
        ADDRESS_COLUMNS.join(", "),
        placeholders,
        updates
    )
}

/// What the upsert would store for `incoming` given the stored `existing` row.
pub fn merge_records(existing: &AddressRecord, incoming: &AddressRecord) -> Result<AddressRecord> {
    let old = existing.to_values();
    let mut merged = incoming.to_values();

    for (column, strategy) in ADDRESS_MERGE_POLICY {
        let index = ADDRESS_COLUMNS
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| anyhow::anyhow!("Merge policy names unknown column {}", column))?;
        merged[index] = strategy.merge(&old[index], &merged[index]);
    }

    AddressRecord::from_values(&merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Confidence;
    use crate::repository::models::Tag;
    use alloy_primitives::{Address, B256, U256};

    fn stored() -> AddressRecord {
        let mut record = AddressRecord::new(Address::repeat_byte(7), "ethereum");
        record.tags = vec![Tag::Contract, Tag::Verified];
        record.code_hash = Some(B256::repeat_byte(1));
        record.contract_name = Some("Token".to_string());
        record.verified = true;
        record.deploy_block_number = Some(100);
        record.deployed_at_timestamp = Some(1_600_000_000);
        record.confidence = Some(Confidence::Precise);
        record.first_seen = Some(1_000);
        record.last_updated = 2_000;
        record.fund = Some(U256::from(5u64));
        record
    }

    #[test]
    fn test_policy_covers_every_non_key_column() {
        let policy: Vec<&str> = ADDRESS_MERGE_POLICY.iter().map(|(c, _)| *c).collect();
        assert_eq!(policy, ADDRESS_COLUMNS[2..].to_vec());
    }

    #[test]
    fn test_null_fields_do_not_clobber() {
        let mut incoming = AddressRecord::new(Address::repeat_byte(7), "ethereum");
        incoming.last_updated = 3_000;

        let merged = merge_records(&stored(), &incoming).unwrap();

        assert_eq!(merged.code_hash, Some(B256::repeat_byte(1)));
        assert_eq!(merged.contract_name.as_deref(), Some("Token"));
        assert_eq!(merged.deployed_at_timestamp, Some(1_600_000_000));
        assert_eq!(merged.confidence, Some(Confidence::Precise));
        assert_eq!(merged.tags, vec![Tag::Contract, Tag::Verified]);
    }

    #[test]
    fn test_overwrite_fields_take_incoming() {
        let mut incoming = AddressRecord::new(Address::repeat_byte(7), "ethereum");
        incoming.last_updated = 3_000;

        let merged = merge_records(&stored(), &incoming).unwrap();

        assert!(!merged.verified);
        assert_eq!(merged.last_updated, 3_000);
        assert_eq!(merged.fund, None);
    }

    #[test]
    fn test_first_seen_keeps_earliest() {
        let mut incoming = stored();
        incoming.first_seen = Some(500);
        assert_eq!(merge_records(&stored(), &incoming).unwrap().first_seen, Some(1_000));

        let mut existing = stored();
        existing.first_seen = None;
        assert_eq!(merge_records(&existing, &incoming).unwrap().first_seen, Some(500));
    }

    #[test]
    fn test_non_empty_tags_replace() {
        let mut incoming = stored();
        incoming.tags = vec![Tag::SelfDestroyed];
        assert_eq!(
            merge_records(&stored(), &incoming).unwrap().tags,
            vec![Tag::SelfDestroyed]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut incoming = AddressRecord::new(Address::repeat_byte(7), "ethereum");
        incoming.contract_name = Some("TokenV2".to_string());
        incoming.last_updated = 3_000;

        let once = merge_records(&stored(), &incoming).unwrap();
        let twice = merge_records(&once, &incoming).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.contract_name.as_deref(), Some("TokenV2"));
    }

    #[test]
    fn test_upsert_sql_shape() {
        let sql = address_upsert_sql();
        assert!(sql.contains("ON CONFLICT(address, network) DO UPDATE SET"));
        assert!(sql.contains("first_seen = COALESCE(addresses.first_seen, excluded.first_seen)"));
        assert!(sql.contains("code_hash = COALESCE(excluded.code_hash, addresses.code_hash)"));
        assert!(sql.contains("verified = excluded.verified"));
        assert!(sql.contains("?23"));
        assert!(!sql.contains("address = excluded.address"));
    }
}

use crate::enrichment::{Confidence, ContractSource};
use alloy_primitives::{Address, B256, U256, keccak256};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    #[serde(rename = "EOA")]
    Eoa,
    Contract,
    Verified,
    SelfDestroyed,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Eoa => "EOA",
            Tag::Contract => "Contract",
            Tag::Verified => "Verified",
            Tag::SelfDestroyed => "SelfDestroyed",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column order shared by inserts, reads and the in-memory merge.
pub const ADDRESS_COLUMNS: [&str; 23] = [
    "address",
    "network",
    "tags",
    "code_hash",
    "contract_name",
    "verified",
    "is_proxy",
    "implementation_address",
    "proxy_contract_name",
    "implementation_contract_name",
    "deploy_tx_hash",
    "deployer_address",
    "deploy_block_number",
    "deployed_at_timestamp",
    "deployed_at",
    "confidence",
    "fetched_at",
    "first_seen",
    "last_updated",
    "fund",
    "last_fund_updated",
    "name_checked",
    "name_checked_at",
];

/// One catalogued address on one network. Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: Address,
    pub network: String,
    pub tags: Vec<Tag>,
    pub code_hash: Option<B256>,
    pub contract_name: Option<String>,
    pub verified: bool,
    pub is_proxy: bool,
    pub implementation_address: Option<Address>,
    pub proxy_contract_name: Option<String>,
    pub implementation_contract_name: Option<String>,
    pub deploy_tx_hash: Option<B256>,
    pub deployer_address: Option<Address>,
    pub deploy_block_number: Option<u64>,
    pub deployed_at_timestamp: Option<u64>,
    pub deployed_at: Option<String>,
    pub confidence: Option<Confidence>,
    pub fetched_at: Option<u64>,
    pub first_seen: Option<u64>,
    pub last_updated: u64,
    pub fund: Option<U256>,
    pub last_fund_updated: Option<u64>,
    pub name_checked: bool,
    pub name_checked_at: Option<u64>,
}

impl AddressRecord {
    pub fn new(address: Address, network: &str) -> Self {
        Self {
            address,
            network: network.to_string(),
            ..Default::default()
        }
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    /// Values in `ADDRESS_COLUMNS` order.
    pub fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(format!("{:?}", self.address)),
            Value::Text(self.network.clone()),
            Value::Text(tags_to_json(&self.tags)),
            opt_text(self.code_hash.map(|h| format!("{h:?}"))),
            opt_text(self.contract_name.clone()),
            Value::Integer(self.verified as i64),
            Value::Integer(self.is_proxy as i64),
            opt_text(self.implementation_address.map(|a| format!("{a:?}"))),
            opt_text(self.proxy_contract_name.clone()),
            opt_text(self.implementation_contract_name.clone()),
            opt_text(self.deploy_tx_hash.map(|h| format!("{h:?}"))),
            opt_text(self.deployer_address.map(|a| format!("{a:?}"))),
            opt_int(self.deploy_block_number),
            opt_int(self.deployed_at_timestamp),
            opt_text(self.deployed_at.clone()),
            opt_text(self.confidence.map(|c| c.as_str().to_string())),
            opt_int(self.fetched_at),
            opt_int(self.first_seen),
            opt_int(Some(self.last_updated)),
            opt_text(self.fund.as_ref().map(pad_fund)),
            opt_int(self.last_fund_updated),
            Value::Integer(self.name_checked as i64),
            opt_int(self.name_checked_at),
        ]
    }

    /// Inverse of `to_values`; used for rows read back from SQLite too.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.len() != ADDRESS_COLUMNS.len() {
            return Err(anyhow::anyhow!(
                "Expected {} address columns, got {}",
                ADDRESS_COLUMNS.len(),
                values.len()
            ));
        }

        let address = parse_text::<Address>(&values[0], "address")?
            .context("address column is NULL")?;
        let network = text(&values[1]).context("network column is NULL")?.to_string();

        Ok(Self {
            address,
            network,
            tags: text(&values[2]).map(tags_from_json).transpose()?.unwrap_or_default(),
            code_hash: parse_text(&values[3], "code_hash")?,
            contract_name: text(&values[4]).map(str::to_string),
            verified: integer(&values[5]).unwrap_or(0) != 0,
            is_proxy: integer(&values[6]).unwrap_or(0) != 0,
            implementation_address: parse_text(&values[7], "implementation_address")?,
            proxy_contract_name: text(&values[8]).map(str::to_string),
            implementation_contract_name: text(&values[9]).map(str::to_string),
            deploy_tx_hash: parse_text(&values[10], "deploy_tx_hash")?,
            deployer_address: parse_text(&values[11], "deployer_address")?,
            deploy_block_number: unsigned(&values[12]),
            deployed_at_timestamp: unsigned(&values[13]),
            deployed_at: text(&values[14]).map(str::to_string),
            confidence: parse_text(&values[15], "confidence")?,
            fetched_at: unsigned(&values[16]),
            first_seen: unsigned(&values[17]),
            last_updated: unsigned(&values[18]).unwrap_or(0),
            fund: text(&values[19]).map(parse_fund).transpose()?,
            last_fund_updated: unsigned(&values[20]),
            name_checked: integer(&values[21]).unwrap_or(0) != 0,
            name_checked_at: unsigned(&values[22]),
        })
    }
}

/// A verified contract's source as stored in `contract_sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub address: Address,
    pub network: String,
    pub source: ContractSource,
}

impl SourceRecord {
    pub fn new(address: Address, network: &str, source: ContractSource) -> Self {
        Self {
            address,
            network: network.to_string(),
            source,
        }
    }

    pub fn source_code_hash(&self) -> B256 {
        keccak256(self.source.source_code.as_bytes())
    }
}

/// Per-network counters for operator visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub network: String,
    pub total: usize,
    pub eoas: usize,
    pub contracts: usize,
    pub verified: usize,
    pub self_destroyed: usize,
    pub untagged: usize,
    pub with_source: usize,
    pub precise_deployments: usize,
}

/// Pad a balance to 78 digits so lexical order equals numeric order.
/// U256 max is approximately 10^77, so 78 digits is sufficient.
pub fn pad_fund(fund: &U256) -> String {
    format!("{fund:0>78}")
}

pub fn parse_fund(padded: &str) -> Result<U256> {
    let trimmed = padded.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str(trimmed).map_err(|_| anyhow::anyhow!("Invalid fund format: {}", padded))
}

pub fn tags_to_json(tags: &[Tag]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub fn tags_from_json(raw: &str) -> Result<Vec<Tag>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).with_context(|| format!("Invalid tags column: {raw}"))
}

fn opt_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn opt_int(value: Option<u64>) -> Value {
    value
        .and_then(|v| i64::try_from(v).ok())
        .map(Value::Integer)
        .unwrap_or(Value::Null)
}

fn text(value: &Value) -> Option<&str> {
    match value {
        Value::Text(s) => Some(s.as_str()),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        _ => None,
    }
}

fn unsigned(value: &Value) -> Option<u64> {
    integer(value).and_then(|i| u64::try_from(i).ok())
}

fn parse_text<T>(value: &Value, column: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    text(value)
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid {} value {:?}: {}", column, s, e))
        })
        .transpose()
}

use alloy_primitives::{Address, B256};
use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// When a contract was deployed. Only a real transaction + block lookup can
/// produce `Precise`; there is no way to build one from a guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeploymentTime {
    #[default]
    Unknown,
    Precise { block_number: u64, timestamp: u64 },
}

impl DeploymentTime {
    pub fn block_number(&self) -> Option<u64> {
        match self {
            DeploymentTime::Precise { block_number, .. } => Some(*block_number),
            DeploymentTime::Unknown => None,
        }
    }

    pub fn timestamp(&self) -> Option<u64> {
        match self {
            DeploymentTime::Precise { timestamp, .. } => Some(*timestamp),
            DeploymentTime::Unknown => None,
        }
    }

    /// ISO-8601 UTC date, e.g. `2024-03-14T13:21:04Z`.
    pub fn iso_date(&self) -> Option<String> {
        self.timestamp().and_then(iso_date)
    }
}

pub fn iso_date(timestamp: u64) -> Option<String> {
    let seconds = i64::try_from(timestamp).ok()?;
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Timestamp came from the creation transaction's block.
    Precise,
    /// Creation transaction is known but its block could not be resolved.
    Partial,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Precise => "precise",
            Confidence::Partial => "partial",
        }
    }
}

impl FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "precise" => Ok(Confidence::Precise),
            "partial" => Ok(Confidence::Partial),
            other => Err(anyhow::anyhow!("Unknown confidence level: {}", other)),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationInfo {
    pub tx_hash: B256,
    pub deployer: Option<Address>,
}

/// Verified source and compiler settings for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractSource {
    pub source_code: String,
    pub compiler_version: Option<String>,
    pub optimization_used: Option<bool>,
    pub runs: Option<u32>,
    pub abi: Option<String>,
    pub contract_file_name: Option<String>,
    pub compiler_type: Option<String>,
    pub evm_version: Option<String>,
    pub constructor_arguments: Option<String>,
    pub library: Option<String>,
    pub license_type: Option<String>,
}

/// Everything the explorer told us about one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentResult {
    pub address: Address,
    pub verified: bool,
    /// Implementation name for proxies when known, otherwise the contract's own.
    pub contract_name: Option<String>,
    pub is_proxy: bool,
    pub implementation_address: Option<Address>,
    pub proxy_contract_name: Option<String>,
    pub implementation_contract_name: Option<String>,
    pub source: Option<ContractSource>,
    pub creation: Option<CreationInfo>,
    pub deployment: DeploymentTime,
}

impl EnrichmentResult {
    pub fn confidence(&self) -> Option<Confidence> {
        match (&self.deployment, &self.creation) {
            (DeploymentTime::Precise { .. }, _) => Some(Confidence::Precise),
            (DeploymentTime::Unknown, Some(_)) => Some(Confidence::Partial),
            (DeploymentTime::Unknown, None) => None,
        }
    }
}

/// One entry of a `getsourcecode` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SourceCodeEntry {
    pub source_code: String,
    #[serde(rename = "ABI")]
    pub abi: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub compiler_type: String,
    pub optimization_used: String,
    pub runs: String,
    pub constructor_arguments: String,
    #[serde(rename = "EVMVersion")]
    pub evm_version: String,
    pub library: String,
    pub contract_file_name: String,
    pub license_type: String,
    pub proxy: String,
    pub implementation: String,
}

impl SourceCodeEntry {
    pub fn contract_name(&self) -> Option<String> {
        non_empty(&self.contract_name)
    }

    pub fn is_verified(&self) -> bool {
        self.contract_name().is_some()
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.trim() == "1"
    }

    pub fn implementation(&self) -> Option<Address> {
        Address::from_str(self.implementation.trim())
            .ok()
            .filter(|address| !address.is_zero())
    }

    pub fn compiler_settings(&self, source_code: String) -> ContractSource {
        ContractSource {
            source_code,
            compiler_version: non_empty(&self.compiler_version),
            optimization_used: match self.optimization_used.trim() {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            },
            runs: self.runs.trim().parse().ok(),
            abi: non_empty(&self.abi),
            contract_file_name: non_empty(&self.contract_file_name),
            compiler_type: non_empty(&self.compiler_type),
            evm_version: non_empty(&self.evm_version),
            constructor_arguments: non_empty(&self.constructor_arguments),
            library: non_empty(&self.library),
            license_type: non_empty(&self.license_type),
        }
    }
}

/// One entry of a `getcontractcreation` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreationEntry {
    pub contract_address: String,
    pub contract_creator: String,
    pub tx_hash: String,
}

impl CreationEntry {
    pub fn into_info(self) -> Option<CreationInfo> {
        let tx_hash = B256::from_str(self.tx_hash.trim()).ok()?;
        let deployer = Address::from_str(self.contract_creator.trim()).ok();
        Some(CreationInfo { tx_hash, deployer })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

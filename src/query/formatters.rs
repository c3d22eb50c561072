use crate::enrichment::ContractSource;
use crate::repository::{AddressRecord, NetworkStats};
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

fn stats_row(stats: &NetworkStats) -> [String; 9] {
    [
        stats.network.clone(),
        stats.total.to_string(),
        stats.eoas.to_string(),
        stats.contracts.to_string(),
        stats.verified.to_string(),
        stats.self_destroyed.to_string(),
        stats.untagged.to_string(),
        stats.with_source.to_string(),
        stats.precise_deployments.to_string(),
    ]
}

pub fn format_stats(stats: &[NetworkStats]) -> String {
    if stats.is_empty() {
        return "No addresses catalogued.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Network",
            "Total",
            "EOA",
            "Contract",
            "Verified",
            "SelfDestroyed",
            "Untagged",
            "With Source",
            "Precise Deploy",
        ]);

    for network in stats {
        table.add_row(stats_row(network).to_vec());
    }

    table.to_string()
}

/// Field/value pairs describing one record, in display order.
fn record_fields(record: &AddressRecord, source: Option<&ContractSource>) -> Vec<(&'static str, String)> {
    let opt = |value: Option<String>| value.unwrap_or_else(|| "N/A".to_string());
    let tags = record
        .tags
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut fields = vec![
        ("address", format!("{:?}", record.address)),
        ("network", record.network.clone()),
        ("tags", if tags.is_empty() { "N/A".to_string() } else { tags }),
        ("code_hash", opt(record.code_hash.map(|h| format!("{h:?}")))),
        ("contract_name", opt(record.contract_name.clone())),
        ("verified", record.verified.to_string()),
        ("is_proxy", record.is_proxy.to_string()),
        (
            "implementation_address",
            opt(record.implementation_address.map(|a| format!("{a:?}"))),
        ),
        ("proxy_contract_name", opt(record.proxy_contract_name.clone())),
        (
            "implementation_contract_name",
            opt(record.implementation_contract_name.clone()),
        ),
        ("deploy_tx_hash", opt(record.deploy_tx_hash.map(|h| format!("{h:?}")))),
        ("deployer_address", opt(record.deployer_address.map(|a| format!("{a:?}")))),
        ("deploy_block_number", opt(record.deploy_block_number.map(|b| b.to_string()))),
        ("deployed_at", opt(record.deployed_at.clone())),
        ("confidence", opt(record.confidence.map(|c| c.to_string()))),
        ("fund", opt(record.fund.map(|f| format_fund(&f)))),
        ("first_seen", opt(record.first_seen.map(|t| t.to_string()))),
        ("last_updated", record.last_updated.to_string()),
    ];

    if let Some(source) = source {
        fields.push(("compiler_version", opt(source.compiler_version.clone())));
        fields.push(("contract_file_name", opt(source.contract_file_name.clone())));
        fields.push(("license_type", opt(source.license_type.clone())));
        fields.push(("source_lines", source.source_code.lines().count().to_string()));
    }

    fields
}

pub fn format_record(record: &AddressRecord, source: Option<&ContractSource>) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Field", "Value"]);

    for (field, value) in record_fields(record, source) {
        table.add_row(vec![Cell::new(field), Cell::new(value)]);
    }

    table.to_string()
}

/// Native balance in ether, falling back to wei.
fn format_fund(fund: &alloy_primitives::U256) -> String {
    format_units(*fund, 18u8).unwrap_or_else(|_| fund.to_string())
}

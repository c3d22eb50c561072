use serde_json::{Map, Value};

const FILE_MARKER: &str = "// File: ";

/// Turns the explorer's raw `SourceCode` payload into searchable text.
///
/// The payload is one of: empty, a single plain-text file, a standard-json
/// document wrapped in double braces (`{{ "sources": { path: { "content" } } }}`),
/// or a legacy map whose values are the file text directly. Multi-file
/// payloads are flattened into one blob with a `// File: <path>` line before
/// each file. Returns `None` when there is no source at all.
pub fn extract_source_text(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match parse_multi_file(trimmed) {
        Some(files) if !files.is_empty() => Some(join_files(&files)),
        _ => Some(raw.to_string()),
    }
}

fn parse_multi_file(payload: &str) -> Option<Vec<(String, String)>> {
    if !payload.starts_with('{') {
        return None;
    }

    // Etherscan wraps standard-json input in an extra pair of braces.
    let document = if payload.starts_with("{{") && payload.ends_with("}}") {
        &payload[1..payload.len() - 1]
    } else {
        payload
    };

    let parsed: Value = serde_json::from_str(document).ok()?;
    let root = parsed.as_object()?;

    match root.get("sources").and_then(Value::as_object) {
        Some(sources) => Some(collect_files(sources)),
        None if root.values().all(|v| v.get("content").is_some()) => Some(collect_files(root)),
        None => None,
    }
}

fn collect_files(sources: &Map<String, Value>) -> Vec<(String, String)> {
    sources
        .iter()
        .filter_map(|(path, entry)| {
            let content = match entry {
                Value::String(text) => text.as_str(),
                Value::Object(file) => file.get("content")?.as_str()?,
                _ => return None,
            };
            Some((path.clone(), content.to_string()))
        })
        .collect()
}

fn join_files(files: &[(String, String)]) -> String {
    files
        .iter()
        .map(|(path, content)| format!("{FILE_MARKER}{path}\n{content}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// EN: src/core/source_executor.rs

//! Runs the backing command of a dynamic source and turns its JSON output
//! into records.

use crate::{
    CancellationToken,
    core::config_loader::value_to_string,
    error::{AliasError, Result},
    models::{DynamicSource, Record},
    system::executor,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Executes a rendered dynamic-source command and returns its records.
///
/// The resolver only talks to this trait, which lets tests count or script
/// executions without spawning processes. Implementations must be `Sync`
/// because independent sources are fetched in parallel.
pub trait SourceRunner: Sync {
    fn run(
        &self,
        name: &str,
        source: &DynamicSource,
        command_line: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<Record>>;
}

/// The production runner: the platform shell, bounded by the source timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellSourceRunner;

impl SourceRunner for ShellSourceRunner {
    fn run(
        &self,
        name: &str,
        source: &DynamicSource,
        command_line: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<Record>> {
        log::debug!("Executing dynamic source '{}': {}", name, command_line);
        let started = Instant::now();

        let stdout = executor::execute_and_capture_output(
            command_line,
            executor::timeout_from_secs(source.timeout),
            cancellation_token,
        )?;
        let records = decode_records(&stdout, &source.mapping)?;

        log::debug!(
            "Dynamic source '{}' produced {} record(s) in {:.2}s",
            name,
            records.len(),
            started.elapsed().as_secs_f64()
        );
        if records.is_empty() {
            log::warn!("Dynamic source '{}' returned no records", name);
        }
        Ok(records)
    }
}

/// Parses a command's stdout and projects it through `mapping`.
///
/// - The output must be JSON. An object is treated as a single record; any
///   other non-array value is rejected.
/// - Each internal key takes the value found at its external key, or at a
///   dotted path into nested objects (`metadata.name`).
/// - External keys absent from an item leave the internal key absent; items
///   where nothing was found are dropped.
pub fn decode_records(raw: &str, mapping: &BTreeMap<String, String>) -> Result<Vec<Record>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AliasError::JsonDecode {
            offset: 0,
            message: "command produced no output".to_string(),
            snippet: String::new(),
        });
    }

    let parsed: Value =
        serde_json::from_str(trimmed).map_err(|e| AliasError::from_json_error(trimmed, &e))?;

    let items = match parsed {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(AliasError::JsonDecode {
                offset: 0,
                message: "expected a JSON array or object".to_string(),
                snippet: other.to_string().chars().take(80).collect(),
            });
        }
    };

    Ok(items
        .iter()
        .map(|item| project(item, mapping))
        .filter(|record| !record.is_empty())
        .collect())
}

fn project(item: &Value, mapping: &BTreeMap<String, String>) -> Record {
    mapping
        .iter()
        .filter_map(|(internal, external)| {
            lookup_path(item, external).map(|value| (internal.clone(), value_to_string(value)))
        })
        .collect()
}

/// Exact key first, so keys that themselves contain dots keep working.
fn lookup_path<'v>(item: &'v Value, path: &str) -> Option<&'v Value> {
    let object = item.as_object()?;
    if let Some(value) = object.get(path) {
        return Some(value);
    }
    path.split('.')
        .try_fold(item, |current, segment| current.as_object()?.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_projects_mapped_keys_and_drops_the_rest() {
        // --- Setup ---
        let raw = r#"[{"Name": "api", "Status": "up", "Id": 7}, {"Name": "db"}]"#;

        // --- Execute ---
        let records =
            decode_records(raw, &mapping(&[("name", "Name"), ("state", "Status")])).unwrap();

        // --- Assert ---
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "api");
        assert_eq!(records[0]["state"], "up");
        assert!(!records[0].contains_key("Id"));
        assert!(!records[1].contains_key("state"));
    }

    #[test]
    fn test_dotted_paths_reach_nested_values() {
        let raw = r#"{"metadata": {"name": "web-1", "labels": {"tier": "front"}}, "spec.replicas": 3}"#;
        let records = decode_records(
            raw,
            &mapping(&[
                ("name", "metadata.name"),
                ("tier", "metadata.labels.tier"),
                ("replicas", "spec.replicas"),
            ]),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "web-1");
        assert_eq!(records[0]["tier"], "front");
        assert_eq!(records[0]["replicas"], "3");
    }

    #[test]
    fn test_items_without_any_mapped_key_are_dropped() {
        let records = decode_records(r#"[{"x": 1}, {"id": 2}]"#, &mapping(&[("id", "id")])).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_invalid_json_reports_offset_and_snippet() {
        // --- Execute ---
        let result = decode_records("[{\"id\": 1}, oops]", &mapping(&[("id", "id")]));

        // --- Assert ---
        match result {
            Err(AliasError::JsonDecode { offset, snippet, .. }) => {
                assert!(offset >= 11 && offset <= 13, "offset was {offset}");
                assert!(snippet.contains("oops"));
            }
            other => panic!("expected a JSON error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_scalar_output_are_rejected() {
        assert!(matches!(
            decode_records("  \n", &BTreeMap::new()),
            Err(AliasError::JsonDecode { offset: 0, .. })
        ));
        assert!(matches!(
            decode_records("42", &BTreeMap::new()),
            Err(AliasError::JsonDecode { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_runs_the_command() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;

        // --- Setup ---
        let source = DynamicSource {
            command: crate::core::reference::Template::parse(""),
            mapping: mapping(&[("name", "n")]),
            timeout: 5,
            cache_ttl: 300,
        };

        // --- Execute ---
        let records = ShellSourceRunner
            .run(
                "names",
                &source,
                r#"printf '[{"n":"a"},{"n":"b"}]'"#,
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();

        // --- Assert ---
        let names: Vec<_> = records.iter().map(|r| r["name"].as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}

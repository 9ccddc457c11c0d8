// EN: src/error.rs

use crate::core::validator::Finding;
use crate::system::executor::ExecutionError;
use thiserror::Error;

/// Every failure the resolution and matching core can surface to its caller.
///
/// Each variant carries enough structured detail (source, key, path, offset)
/// to reproduce the problem. None of them is retried automatically.
#[derive(Error, Debug)]
pub enum AliasError {
    #[error("Malformed block #{block}: {message}")]
    ConfigSyntax { block: usize, message: String },

    #[error("Configuration validation failed with {} finding(s).", .findings.len())]
    Validation { findings: Vec<Finding> },

    #[error("Cyclical dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Source '{0}' is not defined.")]
    UndefinedSource(String),

    #[error("Key '{key}' not found in source '{source_name}'.")]
    UndefinedKey { source_name: String, key: String },

    #[error("Index {index} is out of range for source '{source_name}' ({len} record(s)).")]
    IndexOutOfRange {
        source_name: String,
        index: i64,
        len: usize,
    },

    #[error("Command not found: '{input}'")]
    UnknownCommand { input: String },

    #[error("Strict mode enabled. Unknown arguments: {}", .tokens.join(" "))]
    UnknownArguments { tokens: Vec<String> },

    #[error("Command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Command exited with status {code}")]
    SubprocessExit { code: i32 },

    #[error("Invalid JSON at byte {offset}: {message} (near `{snippet}`)")]
    JsonDecode {
        offset: usize,
        message: String,
        snippet: String,
    },

    #[error("Cache file is corrupted: {0}")]
    CacheCorruption(String),

    #[error("Could not parse input: unbalanced quotes in '{0}'")]
    Tokenize(String),

    #[error("Operation was cancelled by the user.")]
    Cancelled,

    #[error("Could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` for the alias core.
pub type Result<T, E = AliasError> = std::result::Result<T, E>;

impl AliasError {
    /// Maps the error to the process exit code the binary reports.
    ///
    /// Validation, unknown command, strict rejection, cycles and timeouts each
    /// get their own code so wrapper scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 2,
            Self::UnknownCommand { .. } => 3,
            Self::UnknownArguments { .. } => 4,
            Self::CyclicDependency { .. } => 5,
            Self::Timeout { .. } => 124,
            Self::Cancelled => 130,
            Self::SubprocessExit { code } if *code != 0 => *code,
            _ => 1,
        }
    }

    /// Builds a [`AliasError::JsonDecode`] from a `serde_json` failure, quoting
    /// the raw payload around the failing position.
    pub fn from_json_error(raw: &str, err: &serde_json::Error) -> Self {
        let offset = byte_offset(raw, err.line(), err.column());
        Self::JsonDecode {
            offset,
            message: err.to_string(),
            snippet: snippet_around(raw, offset),
        }
    }
}

impl From<ExecutionError> for AliasError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Timeout { seconds, .. } => Self::Timeout { seconds },
            ExecutionError::NonZeroExitStatus { code, .. } => Self::SubprocessExit { code },
            ExecutionError::Cancelled => Self::Cancelled,
            ExecutionError::CommandFailed(command, source) => Self::Spawn { command, source },
            ExecutionError::InvalidUtf8Output { source, .. } => Self::JsonDecode {
                offset: source.utf8_error().valid_up_to(),
                message: "output is not valid UTF-8".to_string(),
                snippet: String::from_utf8_lossy(source.as_bytes()).chars().take(80).collect(),
            },
        }
    }
}

/// Converts serde_json's 1-based line/column into a byte offset into `raw`.
fn byte_offset(raw: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start: usize = raw
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(raw.len())
}

fn snippet_around(raw: &str, offset: usize) -> String {
    let radius = crate::constants::JSON_SNIPPET_RADIUS;
    let mut start = offset.saturating_sub(radius);
    let mut end = (offset + radius).min(raw.len());
    while !raw.is_char_boundary(start) {
        start -= 1;
    }
    while !raw.is_char_boundary(end) {
        end += 1;
    }
    raw.get(start..end).unwrap_or_default().replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_for_reported_outcomes() {
        let codes = [
            AliasError::Validation { findings: vec![] }.exit_code(),
            AliasError::UnknownCommand { input: "x".into() }.exit_code(),
            AliasError::UnknownArguments { tokens: vec![] }.exit_code(),
            AliasError::CyclicDependency { path: vec![] }.exit_code(),
            AliasError::Timeout { seconds: 1 }.exit_code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_json_error_reports_offset_and_snippet() {
        // --- Setup ---
        let raw = "[{\"a\": 1},\n {\"b\": }]";
        let err = serde_json::from_str::<serde_json::Value>(raw).unwrap_err();

        // --- Execute ---
        let decoded = AliasError::from_json_error(raw, &err);

        // --- Assert ---
        match decoded {
            AliasError::JsonDecode { offset, snippet, .. } => {
                assert!((17..=19).contains(&offset), "offset was {offset}");
                assert!(snippet.contains("\"b\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_subprocess_exit_propagates_child_code() {
        assert_eq!(AliasError::SubprocessExit { code: 7 }.exit_code(), 7);
    }
}

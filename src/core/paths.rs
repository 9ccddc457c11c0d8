// EN: src/core/paths.rs

use crate::constants::{
    CACHE_FILE_CANDIDATES, CONFIG_FILE_CANDIDATES, DEFAULT_CACHE_FILE, DEFAULT_CONFIG_FILE,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not expand path '{path}': {message}")]
    Expansion { path: String, message: String },
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in a path.
pub fn expand(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        path: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Picks a file location: the explicit path if given, else the first
/// existing candidate, else the default. Relative candidates are looked up
/// from the current directory.
pub fn resolve_file(
    explicit: Option<&str>,
    candidates: &[&str],
    default: &str,
) -> Result<PathBuf, PathError> {
    if let Some(path) = explicit {
        return expand(path);
    }

    for candidate in candidates {
        let path = expand(candidate)?;
        if path.is_file() {
            log::debug!("Using '{}'", path.display());
            // `dunce` keeps Windows paths free of the `\\?\` prefix.
            return Ok(dunce::canonicalize(&path).unwrap_or(path));
        }
    }
    expand(default)
}

/// The configuration file for this invocation.
pub fn config_path(explicit: Option<&str>) -> Result<PathBuf, PathError> {
    resolve_file(explicit, CONFIG_FILE_CANDIDATES, DEFAULT_CONFIG_FILE)
}

/// The cache file for this invocation.
pub fn cache_path(explicit: Option<&str>) -> Result<PathBuf, PathError> {
    resolve_file(explicit, CACHE_FILE_CANDIDATES, DEFAULT_CACHE_FILE)
}

// EN: src/cli/handlers/commons.rs

// Shared plumbing for the handlers: locating and loading the config, opening
// the cache store, and printing validation reports.

use crate::{
    cli::Cli,
    core::{
        cache::{CacheStore, unix_now},
        config_loader::{self, process_env},
        crypto::CacheCipher,
        paths,
        validator::{self, ValidationReport},
    },
    models::Config,
    state::StoreGuard,
};
use anyhow::{Context, Result};
use colored::Colorize;
use log::LevelFilter;
use std::env;
use std::path::PathBuf;

/// Filter used when `RUST_LOG` is not set. The crate's own debug records pass
/// the filter but stay below the global max level until `verbose` is on.
const DEFAULT_LOG_FILTER: &str = "warn,dynalias=debug";

/// Installs the logger. Must run once, before any handler.
pub fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER),
    )
    .init();
    if !log_env_overridden() {
        log::set_max_level(LevelFilter::Warn);
    }
}

/// Applies the `verbose` setting of a loaded config. An explicit `RUST_LOG`
/// always wins.
pub fn apply_verbosity(config: &Config) {
    if config.settings.verbose && !log_env_overridden() {
        log::set_max_level(LevelFilter::Debug);
        log::debug!("Verbose logging enabled by config");
    }
}

fn log_env_overridden() -> bool {
    env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some()
}

/// Locates and loads the config file for this invocation.
pub fn load_config(cli: &Cli) -> Result<(PathBuf, Config)> {
    let path = paths::config_path(cli.config.as_deref())?;
    let config = config_loader::load_config(&path, &process_env)
        .with_context(|| format!("Failed to load config '{}'", path.display()))?;
    apply_verbosity(&config);
    Ok((path, config))
}

/// Opens the cache store for this invocation. Entries already expired
/// according to `config` are dropped at load; without a config every entry
/// is judged by the default TTL.
pub fn open_store(cli: &Cli, config: Option<&Config>) -> Result<StoreGuard> {
    let path = paths::cache_path(cli.cache.as_deref())?;
    let ttls = config.map(Config::ttl_map).unwrap_or_default();
    let store = CacheStore::load(&path, CacheCipher::for_this_machine(), &ttls, unix_now());
    Ok(StoreGuard::new(store))
}

/// The config if one can be loaded, for handlers that work without it.
pub fn optional_config(cli: &Cli) -> Option<Config> {
    match load_config(cli) {
        Ok((_, config)) => Some(config),
        Err(e) => {
            log::debug!("Continuing without config: {e:#}");
            None
        }
    }
}

/// Validates `config` and fails with the report's findings when any check
/// failed. The failures are printed to stderr first.
pub fn ensure_valid(config: &Config) -> Result<()> {
    let report = validator::validate(config);
    if !report.passed() {
        for line in report_lines(&report, false) {
            eprintln!("{line}");
        }
    }
    report.into_result()?;
    Ok(())
}

/// A colored rendition of `report`. Without `verbose` only the failed checks
/// are listed.
pub fn report_lines(report: &ValidationReport, verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for check in report.checks() {
        if !verbose && check.passed {
            continue;
        }
        let status = if check.passed {
            "[OK]".green().bold()
        } else {
            "[FAIL]".red().bold()
        };
        lines.push(format!("{} {}", status, check.finding.message));
        if !check.finding.location.is_empty() {
            lines.push(format!(
                "       {} {}",
                "Location:".dimmed(),
                check.finding.location
            ));
        }
        if let Some(hint) = &check.finding.hint {
            lines.push(format!("       {} {}", "Hint:".yellow(), hint));
        }
    }

    let summary = format!(
        "Results: {}/{} passed, {} failed",
        report.passed_count(),
        report.checks().len(),
        report.failed_count()
    );
    lines.push(String::new());
    lines.push(if report.passed() {
        summary.green().to_string()
    } else {
        summary.red().to_string()
    });
    lines
}

// EN: src/cli/handlers/manage.rs

// Boundary operations on the cache store. Each one loads the store, applies
// a single change and flushes it.

use crate::{
    CancellationToken,
    cli::{Cli, handlers::commons},
    core::cache::ClearScope,
    state::StoreGuard,
};
use anyhow::{Result, anyhow};
use colored::*;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::io::IsTerminal;

fn open(cli: &Cli) -> Result<StoreGuard> {
    let config = commons::optional_config(cli);
    commons::open_store(cli, config.as_ref())
}

fn clear(cli: &Cli, scope: ClearScope, what: &str) -> Result<()> {
    let mut store = open(cli)?;
    let removed = store.clear(scope)?;
    store.commit()?;
    println!("{} {} {}.", "Cleared".green().bold(), removed, what);
    Ok(())
}

/// `--dya-clear-cache`
pub fn clear_cache(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    clear(cli, ClearScope::Cache, "cached source(s)")
}

/// `--dya-clear-history`
pub fn clear_history(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    clear(cli, ClearScope::History, "history line(s)")
}

/// `--dya-clear-locals`
pub fn clear_locals(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    clear(cli, ClearScope::Locals, "local(s)")
}

/// `--dya-clear-all`: deletes the cache file. Asks first when attached to a
/// terminal.
pub fn clear_all(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    let mut store = open(cli)?;
    let path = store.path().display().to_string();

    if std::io::stdin().is_terminal() {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Delete the cache file '{}'?", path))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    if store.clear(ClearScope::All)? == 0 {
        println!("{}", format!("No cache file at '{path}'.").dimmed());
    } else {
        println!("{} '{}'.", "Deleted".green().bold(), path);
    }
    store.commit()?;
    Ok(())
}

/// `--dya-set-locals <key> <value>`
pub fn set_local(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    let Some([key, value]) = cli.set_locals.as_deref() else {
        return Err(anyhow!("--dya-set-locals expects a key and a value"));
    };
    if key.trim().is_empty() {
        return Err(anyhow!("Local key cannot be empty."));
    }

    let mut store = open(cli)?;
    store.set_local(key, value);
    store.commit()?;
    println!("{} {} = {}", "Set local".green().bold(), key.cyan(), value);
    Ok(())
}

/// `--dya-dump-cache`: prints the decrypted document.
pub fn dump_cache(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    // Read-only: entries pruned at load are not written back.
    let store = open(cli)?.into_inner();
    println!("{}", format!("# {}", store.path().display()).dimmed());
    println!("{}", store.dump()?);
    Ok(())
}

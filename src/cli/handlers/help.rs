// EN: src/cli/handlers/help.rs

use crate::{
    CancellationToken,
    cli::{Cli, handlers::commons},
    constants::{APP_NAME, APP_SHORTCUT},
    core::helper,
    models::{Config, NodeId},
};
use anyhow::Result;
use clap::CommandFactory;
use colored::*;

/// `--dya-help`: the binary's own flags, followed by the configured
/// commands when a config can be loaded.
pub fn handle(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    Cli::command().print_long_help()?;
    if let Some(config) = commons::optional_config(cli) {
        println!();
        print_global(&config);
    }
    Ok(())
}

/// Help for a matched chain, or the global listing for an empty one.
pub fn print_alias_help(config: &Config, chain: &[NodeId]) {
    if chain.is_empty() {
        print_global(config);
        return;
    }
    println!("{}", helper::render_help(&config.tree, chain));
}

/// Lists every source and top-level command of `config`.
pub fn print_global(config: &Config) {
    println!("{}", format!("{APP_NAME} ({APP_SHORTCUT})").yellow().bold());
    println!();
    let listing = helper::render_global(config);
    if listing.trim().is_empty() {
        println!("{}", "No sources or commands are configured.".dimmed());
        return;
    }
    for line in listing.lines() {
        // Section headers are the only unindented lines.
        if !line.is_empty() && !line.starts_with(' ') && !line.starts_with('-') {
            println!("{}", line.cyan().bold());
        } else {
            println!("{line}");
        }
    }
}

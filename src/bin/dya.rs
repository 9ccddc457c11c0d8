// EN: src/bin/dya.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use dynalias::{
    CancellationToken,
    cli::{Cli, handlers},
    error::AliasError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// --- Action Definition and Registry ---

/// A management flag and the handler it selects. Handlers share one
/// signature so the registry stays a flat table.
struct ActionDefinition {
    flag: &'static str,
    selected: fn(&Cli) -> bool,
    handler: fn(&Cli, &CancellationToken) -> Result<()>,
}

/// Every `--dya-*` action, in the order they run when several are given.
/// Anything not selected here is alias input for the `run` handler.
static ACTION_REGISTRY: &[ActionDefinition] = &[
    ActionDefinition {
        flag: "--dya-help",
        selected: |cli| cli.help,
        handler: handlers::help::handle,
    },
    ActionDefinition {
        flag: "--dya-validate",
        selected: |cli| cli.validate,
        handler: handlers::validate::handle,
    },
    ActionDefinition {
        flag: "--dya-clear-all",
        selected: |cli| cli.clear_all,
        handler: handlers::manage::clear_all,
    },
    ActionDefinition {
        flag: "--dya-clear-cache",
        selected: |cli| cli.clear_cache,
        handler: handlers::manage::clear_cache,
    },
    ActionDefinition {
        flag: "--dya-clear-history",
        selected: |cli| cli.clear_history,
        handler: handlers::manage::clear_history,
    },
    ActionDefinition {
        flag: "--dya-clear-locals",
        selected: |cli| cli.clear_locals,
        handler: handlers::manage::clear_locals,
    },
    ActionDefinition {
        flag: "--dya-set-locals",
        selected: |cli| cli.set_locals.is_some(),
        handler: handlers::manage::set_local,
    },
    ActionDefinition {
        flag: "--dya-dump-cache",
        selected: |cli| cli.dump_cache,
        handler: handlers::manage::dump_cache,
    },
    ActionDefinition {
        flag: "--dya-complete",
        selected: |cli| cli.complete.is_some(),
        handler: handlers::complete::handle,
    },
];

/// The actions selected on this command line.
fn selected_actions(cli: &Cli) -> Vec<&'static ActionDefinition> {
    ACTION_REGISTRY
        .iter()
        .filter(|action| (action.selected)(cli))
        .collect()
}

/// The main entry point of `dya`.
/// Sets up logging and Ctrl-C, dispatches, and maps errors to exit codes.
fn main() {
    handlers::commons::init_logging();

    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));
    let handler_token = Arc::clone(&cancellation_token);
    if let Err(e) = ctrlc::set_handler(move || handler_token.store(true, Ordering::SeqCst)) {
        log::warn!("Could not install the Ctrl-C handler: {}", e);
    }

    if let Err(e) = run_cli(Cli::parse(), &cancellation_token) {
        let alias_error = e.downcast_ref::<AliasError>();
        let code = alias_error.map_or(1, AliasError::exit_code);

        // A cancelled or failed child has already spoken for itself.
        if matches!(
            alias_error,
            Some(AliasError::Cancelled | AliasError::SubprocessExit { .. })
        ) {
            log::debug!("{}", e);
            std::process::exit(code);
        }

        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(code);
    }
}

/// Runs the selected management actions, or the alias input when there are
/// none. With neither, prints the global help.
fn run_cli(cli: Cli, cancellation_token: &CancellationToken) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let actions = selected_actions(&cli);
    if !actions.is_empty() {
        if !cli.input.is_empty() {
            log::warn!(
                "Ignoring alias input '{}' alongside management flags",
                cli.input_line()
            );
        }
        for action in actions {
            log::debug!("Running action {}", action.flag);
            (action.handler)(&cli, cancellation_token)?;
        }
        return Ok(());
    }

    if cli.input.is_empty() {
        return handlers::help::handle(&cli, cancellation_token);
    }
    handlers::run::handle(&cli, cancellation_token)
}

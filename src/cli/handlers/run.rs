// EN: src/cli/handlers/run.rs

use crate::{
    CancellationToken,
    cli::{Cli, handlers::{commons, help}},
    core::{
        cache::CacheStore,
        config_loader::value_to_string,
        matcher::{self, MatchOutcome, ResolvedCommand},
        resolver::Resolver,
        source_executor::ShellSourceRunner,
    },
    error::AliasError,
    system::executor::{self, timeout_from_secs},
};
use anyhow::Result;
use colored::*;
use serde_json::Value;

/// Main entry point for an alias invocation: validate, match, render, run.
///
/// The cache store is flushed once at the end, whether the command succeeded
/// or not.
pub fn handle(cli: &Cli, cancellation_token: &CancellationToken) -> Result<()> {
    let (_, config) = commons::load_config(cli)?;
    commons::ensure_valid(&config)?;

    let mut store = commons::open_store(cli, Some(&config))?;
    let runner = ShellSourceRunner;
    let input = cli.input_line();
    log::debug!("Matching input '{}'", input);

    let outcome = {
        let mut resolver = Resolver::new(&config, &mut store, &runner, cancellation_token.clone());
        matcher::match_input(&input, &mut resolver)
    };

    let result = match outcome {
        Ok(MatchOutcome::Help(chain)) => {
            help::print_alias_help(&config, &chain);
            Ok(())
        }
        Ok(MatchOutcome::Resolved(resolved)) => {
            store.push_history(&resolved.input, config.settings.history_size);
            execute(&resolved, &mut store, cancellation_token)
        }
        Err(e) => Err(e),
    };

    let saved = store.commit();
    result?;
    saved?;
    Ok(())
}

fn execute(
    resolved: &ResolvedCommand,
    store: &mut CacheStore,
    cancellation_token: &CancellationToken,
) -> Result<(), AliasError> {
    eprintln!("{} {}", "Running:".green().bold(), resolved.command_line);
    eprintln!("{}", "-".repeat(30));

    let timeout = timeout_from_secs(resolved.timeout);
    if !resolved.set_locals {
        executor::execute_command(&resolved.command_line, timeout, cancellation_token)?;
        return Ok(());
    }

    let output =
        executor::execute_and_capture_output(&resolved.command_line, timeout, cancellation_token)?;
    let pretty = store_locals(&output, store)?;
    println!("{pretty}");
    Ok(())
}

/// Parses `output` as a JSON object and stores every pair as a local.
/// Returns the object pretty-printed.
fn store_locals(output: &str, store: &mut CacheStore) -> Result<String, AliasError> {
    let object = match serde_json::from_str::<Value>(output) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            return Err(AliasError::JsonDecode {
                offset: 0,
                message: "expected a JSON object of locals".to_string(),
                snippet: other.to_string().chars().take(80).collect(),
            });
        }
        Err(e) => return Err(AliasError::from_json_error(output, &e)),
    };

    for (key, value) in &object {
        store.set_local(key, &value_to_string(value));
    }
    log::debug!("Stored {} local(s)", object.len());

    let value = Value::Object(object);
    Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
}

// EN: src/cli/handlers/validate.rs

use crate::{
    CancellationToken,
    cli::{Cli, handlers::commons},
    core::{resolver, validator},
};
use anyhow::Result;
use colored::*;

/// `--dya-validate [--verbose]`: runs every check and prints the report.
/// Fails (exit code 2) when any check failed. A verbose run of a valid config
/// also shows the order dynamic sources resolve in.
pub fn handle(cli: &Cli, _cancellation_token: &CancellationToken) -> Result<()> {
    let (path, config) = commons::load_config(cli)?;
    println!("{} {}", "Validating".bold(), path.display().to_string().cyan());
    println!();

    let report = validator::validate(&config);
    for line in commons::report_lines(&report, cli.verbose) {
        println!("{line}");
    }
    report.into_result()?;

    if cli.verbose {
        let order = resolver::dependency_order(&config)?;
        if !order.is_empty() {
            println!();
            println!("{} {}", "Resolution order:".bold(), order.join(" -> "));
        }
    }
    Ok(())
}

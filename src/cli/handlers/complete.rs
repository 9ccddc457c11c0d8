// EN: src/cli/handlers/complete.rs

use crate::{
    CancellationToken,
    cli::{Cli, handlers::commons},
    core::{completion, resolver::Resolver, source_executor::ShellSourceRunner},
};
use anyhow::Result;

/// `--dya-complete <input>`: prints one `text<TAB>description` line per
/// candidate, for shell completion scripts.
pub fn handle(cli: &Cli, cancellation_token: &CancellationToken) -> Result<()> {
    let partial = cli.complete.as_deref().unwrap_or_default();
    let (_, config) = commons::load_config(cli)?;
    let mut store = commons::open_store(cli, Some(&config))?;
    let runner = ShellSourceRunner;

    let candidates = {
        let mut resolver = Resolver::new(&config, &mut store, &runner, cancellation_token.clone());
        completion::suggest(partial, &mut resolver)
    };

    let saved = store.commit();
    for candidate in candidates? {
        println!("{}\t{}", candidate.text, candidate.description);
    }
    saved?;
    Ok(())
}

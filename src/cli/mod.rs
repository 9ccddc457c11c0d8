// EN: src/cli/mod.rs

use clap::Parser;

pub mod handlers;

/// Runs dynamic command aliases declared in a config file.
///
/// Everything that is not a `--dya-*` flag is the alias input, e.g.
/// `dya ssh staging`. Help for an alias is `dya <alias> -h`; `dya -h` lists
/// every source and command.
#[derive(Parser, Debug, Default)]
#[command(
    name = "dya",
    author,
    version,
    about,
    long_about = None,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
// `-h` and `--help` belong to the alias input.
#[command(disable_help_flag = true, disable_help_subcommand = true)]
pub struct Cli {
    /// Config file to use instead of the usual search locations.
    #[arg(long = "dya-config", value_name = "PATH")]
    pub config: Option<String>,

    /// Cache file to use instead of the usual search locations.
    #[arg(long = "dya-cache", value_name = "PATH")]
    pub cache: Option<String>,

    /// Check the config and print the report.
    #[arg(long = "dya-validate")]
    pub validate: bool,

    /// With `--dya-validate`, also list the checks that passed.
    #[arg(long, requires = "validate")]
    pub verbose: bool,

    /// Drop every cached source result. History and locals are kept.
    #[arg(long = "dya-clear-cache")]
    pub clear_cache: bool,

    /// Drop the command history.
    #[arg(long = "dya-clear-history")]
    pub clear_history: bool,

    /// Drop every saved local.
    #[arg(long = "dya-clear-locals")]
    pub clear_locals: bool,

    /// Delete the cache file.
    #[arg(long = "dya-clear-all")]
    pub clear_all: bool,

    /// Store a local, readable as `$${locals.KEY}`.
    #[arg(long = "dya-set-locals", num_args = 2, value_names = ["KEY", "VALUE"])]
    pub set_locals: Option<Vec<String>>,

    /// Print the decrypted cache document.
    #[arg(long = "dya-dump-cache")]
    pub dump_cache: bool,

    /// Print completion candidates for a partial input line.
    #[arg(long = "dya-complete", value_name = "INPUT", allow_hyphen_values = true)]
    pub complete: Option<String>,

    /// Print this help.
    #[arg(long = "dya-help")]
    pub help: bool,

    /// The alias input.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ALIAS")]
    pub input: Vec<String>,
}

impl Cli {
    /// The alias input as one line. Tokens containing whitespace or quotes
    /// are re-quoted so the matcher sees the same tokens the shell produced.
    pub fn input_line(&self) -> String {
        self.input
            .iter()
            .map(|token| {
                shlex::try_quote(token)
                    .map(|quoted| quoted.into_owned())
                    .unwrap_or_else(|_| token.clone())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_input_keeps_hyphenated_tokens() {
        let cli = Cli::parse_from(["dya", "g", "-v", "log", "--help"]);
        assert_eq!(cli.input, ["g", "-v", "log", "--help"]);
        assert!(!cli.help);
    }

    #[test]
    fn test_bare_help_flag_is_alias_input() {
        let cli = Cli::parse_from(["dya", "-h"]);
        assert_eq!(cli.input, ["-h"]);
    }

    #[test]
    fn test_management_flags_before_the_input() {
        // --- Execute ---
        let cli = Cli::parse_from([
            "dya",
            "--dya-config",
            "/tmp/aliases.toml",
            "--dya-set-locals",
            "token",
            "abc",
        ]);

        // --- Assert ---
        assert_eq!(cli.config.as_deref(), Some("/tmp/aliases.toml"));
        assert_eq!(
            cli.set_locals,
            Some(vec!["token".to_string(), "abc".to_string()])
        );
        assert!(cli.input.is_empty());
    }

    #[test]
    fn test_flags_after_the_alias_belong_to_the_alias() {
        let cli = Cli::parse_from(["dya", "ssh", "--dya-validate"]);
        assert!(!cli.validate);
        assert_eq!(cli.input, ["ssh", "--dya-validate"]);
    }

    #[test]
    fn test_input_line_requotes_tokens_with_spaces() {
        let cli = Cli::parse_from(["dya", "echo", "two words"]);
        assert_eq!(cli.input_line(), "echo 'two words'");
    }
}

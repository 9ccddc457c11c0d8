// EN: src/lib.rs

//! # dynalias
//!
//! Resolution and matching core for dynamic command aliases. An alias is
//! declared once in a config file and may pull values from static tables,
//! from the JSON output of other commands (cached, encrypted, with a TTL),
//! from environment variables and from locals saved by earlier runs.
//!
//! The `dya` binary is a thin layer over this crate: it loads the config,
//! validates it, matches the input line against the command tree and runs
//! the rendered command.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared flag raised by the Ctrl-C handler. Subprocess plumbing polls it
/// and kills the running child once it is set.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod error;
pub mod models;
pub mod state;
pub mod system;

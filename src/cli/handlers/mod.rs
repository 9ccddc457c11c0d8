// EN: src/cli/handlers/mod.rs

// One module per entry point of the `dya` binary.

pub mod commons;
pub mod complete;
pub mod help;
pub mod manage;
pub mod run;
pub mod validate;

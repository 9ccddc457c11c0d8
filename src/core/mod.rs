// EN: src/core/mod.rs

pub mod cache;
pub mod completion;
pub mod config_loader;
pub mod crypto;
pub mod helper;
pub mod matcher;
pub mod paths;
pub mod reference;
pub mod resolver;
pub mod source_executor;
pub mod validator;

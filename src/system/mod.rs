// EN: src/system/mod.rs

//! # System Interaction Layer
//!
//! The boundary between the alias core and the operating system.
//!
//! - **`executor`**: spawns commands through the platform shell, either with
//!   inherited stdio (the final alias command) or with stdout captured (dynamic
//!   sources and `set-locals` commands). Every child is bounded by an optional
//!   timeout and by the shared cancellation token.

pub mod executor;

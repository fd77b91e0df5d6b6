//! Slippy CLI library.
//!
//! Shared pieces of the `slippy` binary: terminal colors, `slippy.toml`
//! loading and the interactive REPL.

pub mod colors;
pub mod config;
pub mod repl;

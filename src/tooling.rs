//! Tooling & Integration Layer
//!
//! Command-line front end over the session manager.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};

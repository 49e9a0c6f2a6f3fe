//! CLI module for the watcher binary.
//!
//! Provides command-line argument parsing and the overrides it applies to
//! the loaded [`Settings`](crate::config::Settings).

pub mod args;

pub use args::Cli;

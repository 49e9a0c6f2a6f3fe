//! CLI argument parsing using clap.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::Settings;
use crate::sink::SinkFormat;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Recursive directory watcher
#[derive(Parser, Debug)]
#[command(
    name = "treewatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Recursive directory watcher",
    long_about = "Watch a directory tree and report every file and directory that is created, \
                  modified, moved or deleted below it.\n\n\
                  Watching without a ROOT falls back to the configured root, which defaults to \
                  the whole filesystem and can exhaust the kernel's watch limit.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Directory to watch recursively
    pub root: Option<PathBuf>,

    /// Ignored; reported with a warning
    #[arg(hide = true)]
    pub extra: Vec<String>,

    /// Path to a custom treewatch.toml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Event output format
    #[arg(long, value_enum)]
    pub format: Option<SinkFormat>,

    /// Append events to this file instead of standard output
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Glob for directory or file names to skip (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(root) = &self.root {
            settings.root = root.clone();
        }
        if let Some(format) = self.format {
            settings.sink.format = format;
        }
        if let Some(output) = &self.output {
            settings.sink.output = Some(output.clone());
        }
        settings.watch.exclude.extend(self.exclude.iter().cloned());
    }
}

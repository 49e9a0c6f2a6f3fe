//! Configuration for the watcher.
//!
//! Layered with figment, lowest priority first:
//! - Default values
//! - TOML configuration file (`--config`, else `.treewatch.toml` if present)
//! - Environment variable overrides
//! - CLI argument overrides (applied by [`crate::cli::Cli::apply`])
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TREEWATCH_` and use double
//! underscores to separate nested levels:
//! - `TREEWATCH_ROOT=/srv/data` sets `root`
//! - `TREEWATCH_WATCH__BUFFER_SIZE=131072` sets `watch.buffer_size`
//! - `TREEWATCH_SINK__FORMAT=json` sets `sink.format`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::sink::SinkFormat;
use crate::watcher::WatchError;
use crate::watcher::DEFAULT_BUFFER_SIZE;
use crate::watcher::decoder::MIN_BUFFER_LEN;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = ".treewatch.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TREEWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory to watch recursively
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Watch behaviour
    #[serde(default)]
    pub watch: WatchConfig,

    /// Where events are written
    #[serde(default)]
    pub sink: SinkConfig,

    /// Diagnostic logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Bytes read from the kernel per call
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Glob patterns for directory and file names to leave alone
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SinkConfig {
    /// `text` or `json`
    #[serde(default)]
    pub format: SinkFormat,

    /// File to append events to; standard output when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `dispatcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_root() -> PathBuf { PathBuf::from("/") }
fn default_buffer_size() -> usize { DEFAULT_BUFFER_SIZE }
fn default_log_level() -> String { "info".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            root: default_root(),
            watch: WatchConfig::default(),
            sink: SinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            exclude: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// An explicitly named config file must exist; the implicit
    /// `.treewatch.toml` is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self, WatchError> {
        let path = match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(WatchError::Config {
                        reason: format!("config file {} not found", path.display()),
                    });
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nested levels; single underscores
            // stay part of the field name.
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the watcher cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.watch.buffer_size < MIN_BUFFER_LEN {
            return Err(WatchError::Config {
                reason: format!(
                    "watch.buffer_size must be at least {MIN_BUFFER_LEN} bytes, got {}",
                    self.watch.buffer_size
                ),
            });
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

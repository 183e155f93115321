//! Layered configuration: defaults, then `{root}/watcher.toml`, then
//! `REDERIVE_`-prefixed environment variables.
//!
//! Environment variables use double underscores for nesting:
//! `REDERIVE_DEBOUNCE_MS=500`, `REDERIVE_LOGGING__DEFAULT=debug`.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Settings file name, resolved against the root directory.
pub const SETTINGS_FILE: &str = "watcher.toml";

const DEFAULT_SETTINGS_TOML: &str = "\
# rederive settings
# debounce_ms = 200
# manifest_name = \"watcher.manifest\"

[logging]
# default = \"warn\"

[logging.modules]
# rederive = \"debug\"
";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Manifest file name under the root directory.
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// How long a source must stay quiet before its change is dispatched.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, or trace.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_manifest_name() -> String {
    crate::manifest::MANIFEST_FILE.to_string()
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest_name: default_manifest_name(),
            debounce_ms: default_debounce_ms(),
            logging: LoggingConfig::default(),
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
    /// Load settings for a root directory.
    ///
    /// Missing file and missing keys fall back to defaults; environment
    /// variables win over the file.
    pub fn load(root: &Path) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(root.join(SETTINGS_FILE)))
            .merge(Env::prefixed("REDERIVE_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Write a commented default `watcher.toml` under `root`.
    pub fn write_default(root: &Path, force: bool) -> std::io::Result<()> {
        let path = root.join(SETTINGS_FILE);
        if path.exists() && !force {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use --force to overwrite)", path.display()),
            ));
        }
        let mut file = std::fs::File::create(&path)?;
        file.write_all(DEFAULT_SETTINGS_TOML.as_bytes())?;
        Ok(())
    }
}

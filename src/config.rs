// src/config.rs

//! Engine configuration, read from `config.toml`.
//!
//! Every scan takes an `Arc<Config>` snapshot when it starts, so editing the
//! live configuration never changes a scan that is already running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::module::OptionValue;
use crate::logging;

const CONFIG_FILE: &str = "config.toml";

/// Suffixes under which a registrable domain is looked for.
const DEFAULT_TLDS: &[&str] = &[
    "com", "net", "org", "edu", "gov", "mil", "int", "info", "biz", "io", "dev", "app", "co", "me",
    "uk", "co.uk", "org.uk", "ac.uk", "gov.uk", "de", "fr", "it", "es", "nl", "be", "ch", "at",
    "se", "no", "dk", "fi", "pl", "cz", "ie", "pt", "ru", "ua", "jp", "co.jp", "cn", "com.cn",
    "kr", "co.kr", "in", "co.in", "au", "com.au", "net.au", "nz", "co.nz", "ca", "us", "br",
    "com.br", "mx", "com.mx", "ar", "com.ar", "za", "co.za", "eu",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// User agent sent with every outbound request.
    pub user_agent: String,
    /// Timeout for a single outbound request.
    pub fetch_timeout_secs: u64,
    pub internet_tlds: Vec<String>,
    /// Wall-clock limit for a whole scan, 0 for none.
    pub max_scan_secs: u64,
    /// Limit for one `handle_event` call, 0 for none.
    pub module_timeout_secs: u64,
    /// Events stored per scan before further ones are dropped, 0 for no cap.
    pub max_events: usize,
    pub data_dir: Option<PathBuf>,
    pub default_usecase: String,
    /// Per-module option overrides, `[modules.<name>]` in the file.
    pub modules: BTreeMap<String, BTreeMap<String, OptionValue>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            fetch_timeout_secs: 5,
            internet_tlds: DEFAULT_TLDS.iter().map(|t| t.to_string()).collect(),
            max_scan_secs: 0,
            module_timeout_secs: 300,
            max_events: 0,
            data_dir: None,
            default_usecase: "all".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or from the default location.
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_path(),
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults.");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "Configuration loaded.");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Directory holding scan journals.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(logging::get_data_dir)
    }

    pub fn module_overrides(&self, module: &str) -> Option<&BTreeMap<String, OptionValue>> {
        self.modules.get(module)
    }
}

pub fn default_path() -> PathBuf {
    logging::get_config_dir().join(CONFIG_FILE)
}

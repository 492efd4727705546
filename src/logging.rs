// src/logging.rs

//! Process-wide diagnostics. Per-scan logs are kept in the scan store.

use std::env;
use std::fs::{self, File};
use std::path::PathBuf;

use color_eyre::eyre::{Result, WrapErr};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    static ref ENV_PREFIX: String = env!("CARGO_CRATE_NAME").to_uppercase();
    /// Overrides the data directory (journals, exports, the log file).
    pub static ref DATA_ENV: String = format!("{}_DATA", *ENV_PREFIX);
    /// Overrides the directory `config.toml` is read from.
    pub static ref CONFIG_ENV: String = format!("{}_CONFIG", *ENV_PREFIX);
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", *ENV_PREFIX);
    static ref PROJECT_DIRS: Option<ProjectDirs> =
        ProjectDirs::from("org", "vanguard-osint", env!("CARGO_PKG_NAME"));
}

fn resolve_dir(env_key: &str, pick: fn(&ProjectDirs) -> PathBuf, fallback: &str) -> PathBuf {
    if let Some(dir) = env::var_os(env_key) {
        return PathBuf::from(dir);
    }
    PROJECT_DIRS
        .as_ref()
        .map(pick)
        .unwrap_or_else(|| PathBuf::from(".").join(fallback))
}

pub fn get_data_dir() -> PathBuf {
    resolve_dir(&DATA_ENV, |dirs| dirs.data_local_dir().to_path_buf(), ".data")
}

pub fn get_config_dir() -> PathBuf {
    resolve_dir(&CONFIG_ENV, |dirs| dirs.config_local_dir().to_path_buf(), ".config")
}

fn log_filter() -> EnvFilter {
    let directive = env::var("RUST_LOG")
        .or_else(|_| env::var(LOG_ENV.as_str()))
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")));
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Sends `tracing` output to a log file in the data directory, truncated on
/// every start, and returns its path. Nothing is written to the terminal,
/// which belongs to the UI.
pub fn initialize_logging() -> Result<PathBuf> {
    let dir = get_data_dir();
    fs::create_dir_all(&dir).wrap_err_with(|| format!("cannot create {}", dir.display()))?;
    let path = dir.join(concat!(env!("CARGO_PKG_NAME"), ".log"));
    let file = File::create(&path).wrap_err_with(|| format!("cannot create {}", path.display()))?;

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_timer(timer)
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_filter(log_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()
        .wrap_err("logging was already initialised")?;
    Ok(path)
}

// src/core/error.rs

//! Error types for every layer of the engine.
//!
//! Module-local failures (`ModuleError`, `FetchError`) are logged and
//! swallowed by the dispatcher. Store refusals (`StoreError`) are typed so the
//! control surface can tell the caller what was rejected. `ScanError` is what
//! scan lifecycle operations return.

use thiserror::Error;

use crate::core::scanner::ScanStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("no target was given")]
    Empty,
    #[error("could not determine the type of target `{0}`")]
    Unrecognised(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("scan `{0}` does not exist")]
    UnknownScan(String),
    #[error("scan `{0}` already exists")]
    ScanExists(String),
    #[error("event {event_type} `{data}` from {module} is already stored")]
    Duplicate {
        event_type: String,
        data: String,
        module: String,
    },
    #[error("parent event `{0}` is not stored in this scan")]
    MissingParent(String),
    #[error("event `{0}` is not part of this scan")]
    UnknownEvent(String),
    #[error("cannot unflag `{event}`: its ancestor `{ancestor}` is still a false positive")]
    FalsePositiveParent { event: String, ancestor: String },
    #[error("scan is {0}; false positives can only be set once it has ended")]
    ScanNotFinished(ScanStatus),
    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("option `{option}` expects a {expected} value")]
    OptionType {
        option: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no modules were selected")]
    NoModules,
    #[error("module `{0}` is not registered")]
    UnknownModule(String),
    #[error("use case `{0}` does not exist")]
    UnknownUseCase(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("a scan name is required")]
    MissingName,
    #[error("scan `{id}` is {status}")]
    InvalidState { id: String, status: ScanStatus },
    #[error("scan `{0}` is not running in this process")]
    NotRunning(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not serialise export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not write GEXF: {0}")]
    Gexf(String),
}

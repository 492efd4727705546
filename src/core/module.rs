// src/core/module.rs

//! The contract every intelligence-gathering module implements, plus the
//! per-scan services a module is handed when it is set up.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::Config;
use crate::core::cache::ResourceCache;
use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType};
use crate::core::fetch::Fetcher;
use crate::core::scanner::runner::DispatchMsg;
use crate::core::store::{LogLevel, ScanDb};
use crate::core::target::Target;

/// Static description of a module, shown by `--list-modules` and used by the
/// resolver for use-case selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMeta {
    pub name: &'static str,
    pub summary: &'static str,
    pub use_cases: &'static [&'static str],
    pub categories: &'static [&'static str],
    pub flags: &'static [&'static str],
}

/// Which events a module wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watch {
    All,
    Types(Vec<EventType>),
}

impl Watch {
    pub fn accepts(&self, event_type: &EventType) -> bool {
        match self {
            Watch::All => true,
            Watch::Types(types) => types.contains(event_type),
        }
    }
}

/// A module option value as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "boolean",
            OptionValue::Int(_) => "integer",
            OptionValue::Str(_) => "string",
            OptionValue::List(_) => "list",
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

/// One declared option: its default and a description for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub default: OptionValue,
    pub description: &'static str,
}

impl OptionSpec {
    pub fn new(name: &'static str, default: impl Into<OptionValue>, description: &'static str) -> Self {
        Self {
            name,
            default: default.into(),
            description,
        }
    }
}

/// The effective options of one module for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOptions {
    values: BTreeMap<String, OptionValue>,
}

impl ModuleOptions {
    /// Merges configured overrides over the declared defaults.
    ///
    /// Keys the module does not declare and values of the wrong kind are
    /// rejected so a typo in the configuration file fails the scan at setup.
    pub fn resolve(
        schema: &[OptionSpec],
        overrides: Option<&BTreeMap<String, OptionValue>>,
    ) -> Result<Self, ModuleError> {
        let mut values: BTreeMap<String, OptionValue> = schema
            .iter()
            .map(|spec| (spec.name.to_string(), spec.default.clone()))
            .collect();

        for (key, value) in overrides.into_iter().flatten() {
            let spec = schema
                .iter()
                .find(|spec| spec.name == key)
                .ok_or_else(|| ModuleError::UnknownOption(key.clone()))?;
            if std::mem::discriminant(&spec.default) != std::mem::discriminant(value) {
                return Err(ModuleError::OptionType {
                    option: key.clone(),
                    expected: spec.default.kind(),
                });
            }
            values.insert(key.clone(), value.clone());
        }

        Ok(Self { values })
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(OptionValue::Bool(true)))
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(OptionValue::Int(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_str(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(OptionValue::Str(v)) => v.as_str(),
            _ => "",
        }
    }

    pub fn get_list(&self, name: &str) -> &[String] {
        match self.values.get(name) {
            Some(OptionValue::List(v)) => v.as_slice(),
            _ => &[],
        }
    }
}

/// Cooperative cancellation shared by the dispatcher and every module of a scan.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Set of inputs a module has already handled in the current scan.
///
/// Lives inside the module instance, which is built fresh for every scan.
#[derive(Debug, Default)]
pub struct ResultsCache {
    seen: HashSet<String>,
}

impl ResultsCache {
    /// Records `value`, returning `false` if it was already seen.
    pub fn first_time(&mut self, value: &str) -> bool {
        self.seen.insert(value.to_string())
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Services available to a module during one scan.
#[derive(Clone)]
pub struct ModuleContext {
    scan_id: Arc<str>,
    module: Arc<str>,
    target: Arc<Target>,
    config: Arc<Config>,
    emitter: mpsc::UnboundedSender<DispatchMsg>,
    stop: StopSignal,
    cache: Arc<ResourceCache>,
    fetcher: Arc<dyn Fetcher>,
    db: Arc<ScanDb>,
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scan_id: &str,
        module: &str,
        target: Arc<Target>,
        config: Arc<Config>,
        emitter: mpsc::UnboundedSender<DispatchMsg>,
        stop: StopSignal,
        cache: Arc<ResourceCache>,
        fetcher: Arc<dyn Fetcher>,
        db: Arc<ScanDb>,
    ) -> Self {
        Self {
            scan_id: Arc::from(scan_id),
            module: Arc::from(module),
            target,
            config,
            emitter,
            stop,
            cache,
            fetcher,
            db,
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub(crate) fn dispatcher(&self) -> mpsc::UnboundedSender<DispatchMsg> {
        self.emitter.clone()
    }

    /// Returns `true` once the scan has been asked to stop.
    pub fn check_for_stop(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Builds an event attributed to this module with `source` as its parent.
    pub fn child(&self, event_type: EventType, data: impl Into<String>, source: &Event) -> Event {
        Event::new(event_type, data, self.module.as_ref(), source)
    }

    /// Hands an event to the dispatcher. Events emitted after a stop request
    /// are dropped and `false` is returned.
    pub fn emit(&self, event: Event) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        self.emitter.send(DispatchMsg::Emitted(event)).is_ok()
    }

    pub async fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(scan_id = %self.scan_id, module = %self.module, "{message}");
        self.write_log(LogLevel::Info, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(scan_id = %self.scan_id, module = %self.module, "{message}");
        self.write_log(LogLevel::Error, message).await;
    }

    async fn write_log(&self, level: LogLevel, message: String) {
        // A deleted scan has nowhere to log to; the tracing line above remains.
        let _ = self
            .db
            .scan_log(&self.scan_id, &self.module, level, message)
            .await;
    }
}

/// The interface of a pluggable intelligence-gathering unit.
///
/// A registry builds a fresh instance for every scan, and `setup` must reset
/// any state the instance carries before the first event arrives.
#[async_trait]
pub trait ScanModule: Send {
    fn meta(&self) -> ModuleMeta;

    fn watched_events(&self) -> Watch;

    fn produced_events(&self) -> Vec<EventType>;

    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn setup(&mut self, ctx: &ModuleContext, options: ModuleOptions) -> Result<(), ModuleError>;

    /// Called once for every event matching `watched_events`. Errors are
    /// logged against the scan and never abort it.
    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError>;
}

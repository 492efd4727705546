// src/core/registry.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::core::error::ResolveError;
use crate::core::event::EventType;
use crate::core::module::{ModuleMeta, OptionSpec, ScanModule, Watch};
use crate::core::modules;

/// Use case that selects every registered module.
pub const ALL_USE_CASE: &str = "all";

type Builder = Arc<dyn Fn() -> Box<dyn ScanModule> + Send + Sync>;

/// A registered module: its declarations plus a way to build fresh instances.
#[derive(Clone)]
pub struct ModuleFactory {
    pub meta: ModuleMeta,
    pub watched: Watch,
    pub produced: Vec<EventType>,
    pub options: Vec<OptionSpec>,
    build: Builder,
}

impl ModuleFactory {
    /// A new, un-setup instance. Every scan gets its own.
    pub fn build(&self) -> Box<dyn ScanModule> {
        (self.build)()
    }

    pub fn name(&self) -> &'static str {
        self.meta.name
    }
}

/// How the modules for a scan are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSelection {
    Modules(Vec<String>),
    EventTypes(Vec<EventType>),
    UseCase(String),
}

/// Ordered set of known modules, keyed by name.
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// A registry holding only the storage modules every scan relies on.
    pub fn new() -> Self {
        let mut registry = Self {
            modules: BTreeMap::new(),
        };
        registry.register(|| Box::new(modules::storage::StorDb::default()));
        registry.register(|| Box::new(modules::storage::StorStdout::default()));
        registry
    }

    /// Every module shipped with the engine.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(modules::blocklist::ListModule::voipbl()));
        registry.register(|| Box::new(modules::bitcoinabuse::BitcoinAbuse::default()));
        registry.register(|| Box::new(modules::dns::DnsResolve::default()));
        registry.register(|| Box::new(modules::sslcert::SslCert::default()));
        registry.register(|| Box::new(modules::webcontent::WebContent::default()));
        registry
    }

    /// Registers a module. A sample instance is built once to read its
    /// declarations; scans always get instances of their own.
    pub fn register<F>(&mut self, build: F)
    where
        F: Fn() -> Box<dyn ScanModule> + Send + Sync + 'static,
    {
        let sample = build();
        let factory = ModuleFactory {
            meta: sample.meta(),
            watched: sample.watched_events(),
            produced: sample.produced_events(),
            options: sample.options(),
            build: Arc::new(build),
        };
        debug!(module = factory.name(), "Module registered.");
        self.modules.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&ModuleFactory> {
        self.modules.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModuleFactory> {
        self.modules.values()
    }

    pub fn use_cases(&self) -> BTreeSet<&'static str> {
        self.list()
            .flat_map(|f| f.meta.use_cases.iter().copied())
            .collect()
    }

    /// Modules that may emit any of `types`.
    pub fn modules_producing(&self, types: &[EventType]) -> BTreeSet<String> {
        self.list()
            .filter(|f| f.produced.iter().any(|p| types.contains(p)))
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Concrete event types the named modules consume. Modules watching
    /// everything add no requirement of their own.
    pub fn events_consumed<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<EventType> {
        let mut consumed = BTreeSet::new();
        for name in names {
            if let Some(Watch::Types(types)) = self.get(name).map(|f| &f.watched) {
                consumed.extend(types.iter().cloned());
            }
        }
        consumed.into_iter().collect()
    }

    /// Works out which modules a scan runs.
    ///
    /// Type selection starts from the producers of the requested types and
    /// keeps adding the producers of whatever the newly added modules consume
    /// until nothing new turns up. The storage module is always added, the
    /// stdout module always removed, and the result is sorted.
    pub fn resolve(&self, selection: &ModuleSelection) -> Result<Vec<String>, ResolveError> {
        let mut selected: BTreeSet<String> = match selection {
            ModuleSelection::Modules(names) => {
                for name in names {
                    if !self.modules.contains_key(name) {
                        return Err(ResolveError::UnknownModule(name.clone()));
                    }
                }
                names.iter().cloned().collect()
            }
            ModuleSelection::EventTypes(types) => {
                let mut selected = self.modules_producing(types);
                let mut delta: Vec<String> = selected.iter().cloned().collect();
                while !delta.is_empty() {
                    let consumed = self.events_consumed(&delta);
                    delta = self
                        .modules_producing(&consumed)
                        .into_iter()
                        .filter(|m| !selected.contains(m))
                        .collect();
                    selected.extend(delta.iter().cloned());
                }
                selected
            }
            ModuleSelection::UseCase(use_case) => {
                let all = use_case.eq_ignore_ascii_case(ALL_USE_CASE);
                let chosen: BTreeSet<String> = self
                    .list()
                    .filter(|f| all || f.meta.use_cases.iter().any(|u| u.eq_ignore_ascii_case(use_case)))
                    .map(|f| f.name().to_string())
                    .collect();
                if chosen.is_empty() {
                    return Err(ResolveError::UnknownUseCase(use_case.clone()));
                }
                chosen
            }
        };

        selected.remove(modules::storage::STDOUT_MODULE);
        if selected.iter().all(|m| m == modules::storage::STORAGE_MODULE) {
            return Err(ResolveError::NoModules);
        }
        selected.insert(modules::storage::STORAGE_MODULE.to_string());
        Ok(selected.into_iter().collect())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

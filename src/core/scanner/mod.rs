// src/core/scanner/mod.rs

//! Scan lifecycle service used by the control surface.
//!
//! `Scanner` validates requests, persists scan instances, and launches each
//! scan as its own supervised task. A scan that panics outright is still
//! moved to `ERROR-FAILED` by its supervisor, so nothing is left `RUNNING`.

pub mod runner;
mod status;

pub use status::ScanStatus;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::cache::ResourceCache;
use crate::core::error::ScanError;
use crate::core::event::Event;
use crate::core::fetch::{Fetcher, HttpFetcher};
use crate::core::module::StopSignal;
use crate::core::modules::storage::{STDOUT_MODULE, STORAGE_MODULE};
use crate::core::registry::{ModuleRegistry, ModuleSelection};
use crate::core::store::{LogLevel, ScanDb, ScanInstance, ScanSettings};
use crate::core::target::{Target, TargetType};

use self::runner::ScanRunner;

/// What the user asked to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub name: String,
    /// Raw target text; classified when the scan is started.
    pub target: String,
    pub selection: ModuleSelection,
    /// Also print every event to stdout.
    pub echo_stdout: bool,
}

/// Progress notifications for interested front ends.
#[derive(Debug, Clone)]
pub enum ScanUpdate {
    Status { scan_id: String, status: ScanStatus },
    Event { scan_id: String, event: Event },
}

struct RunningScan {
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

pub struct Scanner {
    db: Arc<ScanDb>,
    registry: Arc<ModuleRegistry>,
    config: RwLock<Arc<Config>>,
    cache: Arc<ResourceCache>,
    fetcher: Option<Arc<dyn Fetcher>>,
    running: Arc<Mutex<HashMap<String, RunningScan>>>,
    updates: broadcast::Sender<ScanUpdate>,
}

impl Scanner {
    pub fn new(registry: ModuleRegistry, config: Config) -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            db: Arc::new(ScanDb::new()),
            registry: Arc::new(registry),
            config: RwLock::new(Arc::new(config)),
            cache: Arc::new(ResourceCache::new()),
            fetcher: None,
            running: Arc::new(Mutex::new(HashMap::new())),
            updates,
        }
    }

    /// Uses `fetcher` for every scan instead of building an HTTP client from
    /// each scan's configuration.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn db(&self) -> Arc<ScanDb> {
        Arc::clone(&self.db)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// The live configuration; scans already running keep their own snapshot.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn update_config(&self, config: Config) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanUpdate> {
        self.updates.subscribe()
    }

    /// Validates the request, records the scan and launches it.
    ///
    /// Returns the scan id as soon as the instance is stored. An unrecognised
    /// target is refused before anything is stored.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<String, ScanError> {
        let target = Target::parse(&request.target)?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ScanError::MissingName);
        }

        let mut modules = self.registry.resolve(&request.selection)?;
        if request.echo_stdout {
            modules.push(STDOUT_MODULE.to_string());
            modules.sort();
        }

        let config = self.config();
        let fetcher: Arc<dyn Fetcher> = match &self.fetcher {
            Some(f) => Arc::clone(f),
            None => Arc::new(HttpFetcher::new(
                &config.user_agent,
                Duration::from_secs(config.fetch_timeout_secs),
            )?),
        };

        let scan_id = Uuid::new_v4().to_string();
        self.db
            .scan_instance_create(ScanInstance::new(&scan_id, name, &target))
            .await?;
        self.db
            .scan_config_set(
                &scan_id,
                ScanSettings {
                    modules: modules.clone(),
                    config: (*config).clone(),
                },
            )
            .await?;
        info!(scan_id = %scan_id, target = %target.value, target_type = %target.target_type, modules = modules.len(), "Scan created.");

        let stop = StopSignal::new();
        let runner = ScanRunner {
            scan_id: scan_id.clone(),
            target: Arc::new(target),
            modules,
            registry: Arc::clone(&self.registry),
            config,
            db: Arc::clone(&self.db),
            cache: Arc::clone(&self.cache),
            fetcher,
            stop: stop.clone(),
            updates: self.updates.clone(),
        };
        // The entry goes in under the lock the supervisor needs to remove it.
        let mut running = self.lock_running();
        let handle = tokio::spawn(supervise(
            runner,
            Arc::clone(&self.db),
            self.updates.clone(),
            Arc::clone(&self.running),
        ));
        running.insert(
            scan_id.clone(),
            RunningScan {
                stop,
                handle: Some(handle),
            },
        );
        drop(running);
        Ok(scan_id)
    }

    /// Asks a running scan to stop. Only `RUNNING` scans can be stopped.
    pub async fn stop_scan(&self, scan_id: &str) -> Result<(), ScanError> {
        let instance = self.db.scan_instance_get(scan_id).await?;
        let stop = self
            .lock_running()
            .get(scan_id)
            .map(|r| r.stop.clone())
            .ok_or_else(|| ScanError::NotRunning(scan_id.to_string()))?;

        let moved = self
            .db
            .scan_instance_transition(scan_id, ScanStatus::Running, ScanStatus::AbortRequested)
            .await?;
        if !moved {
            return Err(ScanError::InvalidState {
                id: scan_id.to_string(),
                status: instance.status,
            });
        }
        let _ = self.updates.send(ScanUpdate::Status {
            scan_id: scan_id.to_string(),
            status: ScanStatus::AbortRequested,
        });
        let _ = self
            .db
            .scan_log(scan_id, "scanner", LogLevel::Info, "abort requested")
            .await;
        stop.request_stop();
        info!(scan_id, "Abort requested.");
        Ok(())
    }

    /// Starts a new scan with the same name, target and modules as `scan_id`.
    pub async fn rerun_scan(&self, scan_id: &str) -> Result<String, ScanError> {
        let request = self.clone_scan(scan_id).await?;
        self.start_scan(request).await
    }

    pub async fn rerun_scans(&self, scan_ids: &[String]) -> Result<Vec<String>, ScanError> {
        let mut started = Vec::with_capacity(scan_ids.len());
        for id in scan_ids {
            started.push(self.rerun_scan(id).await?);
        }
        Ok(started)
    }

    /// A request pre-filled from an earlier scan.
    pub async fn clone_scan(&self, scan_id: &str) -> Result<ScanRequest, ScanError> {
        let instance = self.db.scan_instance_get(scan_id).await?;
        let settings = self.db.scan_config_get(scan_id).await?;
        let modules: Vec<String> = settings
            .map(|s| s.modules)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m != STORAGE_MODULE && m != STDOUT_MODULE)
            .collect();
        let selection = if modules.is_empty() {
            ModuleSelection::UseCase(self.config().default_usecase.clone())
        } else {
            ModuleSelection::Modules(modules)
        };
        Ok(ScanRequest {
            name: instance.name,
            target: raw_target(&instance.target, instance.target_type),
            selection,
            echo_stdout: false,
        })
    }

    /// Removes a scan and everything it found. Scans still in progress are
    /// refused.
    pub async fn delete_scan(&self, scan_id: &str) -> Result<(), ScanError> {
        let instance = self.db.scan_instance_get(scan_id).await?;
        if !instance.status.is_terminal() {
            return Err(ScanError::InvalidState {
                id: scan_id.to_string(),
                status: instance.status,
            });
        }
        self.db.scan_instance_delete(scan_id).await?;
        self.lock_running().remove(scan_id);
        info!(scan_id, "Scan deleted.");
        Ok(())
    }

    /// Waits for a scan launched by this service to finish and returns its
    /// final status.
    pub async fn wait(&self, scan_id: &str) -> Result<ScanStatus, ScanError> {
        let handle = self
            .lock_running()
            .get_mut(scan_id)
            .and_then(|r| r.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(scan_id, error = %e, "Scan supervisor ended abnormally.");
            }
        }
        Ok(self.db.scan_instance_get(scan_id).await?.status)
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<String, RunningScan>> {
        lock(&self.running)
    }

    /// Number of scans launched by this service that have not ended yet.
    pub fn running_count(&self) -> usize {
        self.lock_running().len()
    }
}

type RunningMap = Mutex<HashMap<String, RunningScan>>;

fn lock(running: &RunningMap) -> MutexGuard<'_, HashMap<String, RunningScan>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a scan in a task of its own and turns a crash into `ERROR-FAILED`.
/// The scan leaves `running` once it has a terminal status.
async fn supervise(
    runner: ScanRunner,
    db: Arc<ScanDb>,
    updates: broadcast::Sender<ScanUpdate>,
    running: Arc<RunningMap>,
) {
    let scan_id = runner.scan_id.clone();
    if let Err(e) = tokio::spawn(runner.run()).await {
        error!(scan_id = %scan_id, error = %e, "Scan task crashed.");
        let _ = db
            .scan_log(&scan_id, "scanner", LogLevel::Error, format!("scan task crashed: {e}"))
            .await;
        if db.scan_instance_set(&scan_id, ScanStatus::ErrorFailed).await.is_ok() {
            let _ = updates.send(ScanUpdate::Status {
                scan_id: scan_id.clone(),
                status: ScanStatus::ErrorFailed,
            });
        }
    }
    lock(&running).remove(&scan_id);
}

/// The form a stored target has to be typed in to classify the same way again.
fn raw_target(value: &str, target_type: TargetType) -> String {
    match target_type {
        TargetType::HumanName | TargetType::Username => format!("\"{value}\""),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_requoted_for_reruns() {
        assert_eq!(raw_target("John Smith", TargetType::HumanName), "\"John Smith\"");
        assert_eq!(raw_target("jsmith", TargetType::Username), "\"jsmith\"");
        assert_eq!(raw_target("example.com", TargetType::InternetName), "example.com");
        let t = Target::parse(&raw_target("jsmith", TargetType::Username)).unwrap();
        assert_eq!(t.target_type, TargetType::Username);
    }

    #[tokio::test]
    async fn bad_targets_never_create_a_scan() {
        let scanner = Scanner::new(ModuleRegistry::new(), Config::default());
        let err = scanner
            .start_scan(ScanRequest {
                name: "bad".into(),
                target: "not a target".into(),
                selection: ModuleSelection::UseCase("all".into()),
                echo_stdout: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Target(_)));
        assert!(scanner.db().scan_instance_list().await.is_empty());
    }

    #[tokio::test]
    async fn live_config_changes_do_not_touch_snapshots() {
        let scanner = Scanner::new(ModuleRegistry::new(), Config::default());
        let before = scanner.config();
        scanner.update_config(Config {
            max_scan_secs: 42,
            ..Config::default()
        });
        assert_eq!(before.max_scan_secs, 0);
        assert_eq!(scanner.config().max_scan_secs, 42);
    }
}

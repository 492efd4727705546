// src/core/scanner/runner.rs

//! Drives one scan from setup to a terminal status.
//!
//! The runner owns a central channel. Every module runs in its own task with
//! its own inbox; events emitted by modules come back through the channel, are
//! stored, and only then fanned out, so no module ever sees an event whose
//! parent is not yet stored. A counter of undelivered inbox items tells the
//! loop when the scan has settled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::cache::ResourceCache;
use crate::core::error::StoreError;
use crate::core::event::Event;
use crate::core::fetch::Fetcher;
use crate::core::module::{ModuleContext, ModuleOptions, ScanModule, StopSignal, Watch};
use crate::core::registry::ModuleRegistry;
use crate::core::scanner::{ScanStatus, ScanUpdate};
use crate::core::store::{LogLevel, ScanDb};
use crate::core::target::Target;

/// Module name recorded on the event that seeds the target.
pub const SEED_MODULE: &str = "__target__";

const COMPONENT: &str = "scanner";

/// How long modules have to return once a scan is stopping.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Messages flowing from module tasks back to the dispatcher.
#[derive(Debug)]
pub enum DispatchMsg {
    Emitted(Event),
    /// One inbox item has been handled (or skipped after a stop).
    Done,
}

#[derive(Default)]
struct Tally {
    stored: usize,
    capped: bool,
}

struct Route {
    name: String,
    watch: Watch,
    inbox: mpsc::UnboundedSender<Arc<Event>>,
}

pub(crate) struct ScanRunner {
    pub scan_id: String,
    pub target: Arc<Target>,
    pub modules: Vec<String>,
    pub registry: Arc<ModuleRegistry>,
    pub config: Arc<Config>,
    pub db: Arc<ScanDb>,
    pub cache: Arc<ResourceCache>,
    pub fetcher: Arc<dyn Fetcher>,
    pub stop: StopSignal,
    pub updates: broadcast::Sender<ScanUpdate>,
}

impl ScanRunner {
    /// Runs the scan and always leaves it in a terminal, persisted state.
    pub async fn run(self) {
        info!(scan_id = %self.scan_id, target = %self.target.value, "Scan starting.");
        let status = match self.execute().await {
            Ok(status) => status,
            Err(message) => {
                error!(scan_id = %self.scan_id, %message, "Scan failed.");
                self.log(LogLevel::Error, message).await;
                ScanStatus::ErrorFailed
            }
        };
        self.set_status(status).await;
        info!(scan_id = %self.scan_id, %status, "Scan ended.");
    }

    async fn execute(&self) -> Result<ScanStatus, String> {
        self.try_set_status(ScanStatus::Starting).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchMsg>();
        let mut routes = Vec::with_capacity(self.modules.len());
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.modules.len());

        let mut prepared = Vec::with_capacity(self.modules.len());
        for name in &self.modules {
            let (module, ctx, watch) = self.prepare(name, &tx)?;
            prepared.push((name.clone(), module, ctx, watch));
        }
        drop(tx);

        let timeout = match self.config.module_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        for (name, module, ctx, watch) in prepared {
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            workers.push(tokio::spawn(module_worker(module, ctx, inbox_rx, timeout)));
            routes.push(Route {
                name,
                watch,
                inbox: inbox_tx,
            });
        }
        self.log(LogLevel::Info, format!("{} modules started", routes.len()))
            .await;

        let deadline = match self.config.max_scan_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };

        let root = Event::root(&self.target.value);
        let mut tally = Tally::default();
        let mut pending = self.admit(root.clone(), &routes, &mut tally).await;
        self.try_set_status(ScanStatus::Running).await?;

        let seed = Event::new(
            self.target.target_type.event_type(),
            self.target.value.clone(),
            SEED_MODULE,
            &root,
        );
        pending += self.admit(seed, &routes, &mut tally).await;

        while pending > 0 && !self.stop.is_stopped() {
            tokio::select! {
                biased;
                _ = self.stop.stopped() => break,
                _ = deadline_reached(deadline) => {
                    let message = format!(
                        "scan exceeded its time limit of {}s and was stopped",
                        self.config.max_scan_secs
                    );
                    warn!(scan_id = %self.scan_id, "{message}");
                    self.log(LogLevel::Error, message).await;
                    self.request_abort().await;
                    self.stop.request_stop();
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(DispatchMsg::Emitted(event)) => {
                        if self.stop.is_stopped() {
                            break;
                        }
                        pending += self.admit(event, &routes, &mut tally).await;
                    }
                    Some(DispatchMsg::Done) => pending = pending.saturating_sub(1),
                    None => break,
                },
            }
        }

        // Closing the inboxes lets each worker drain and exit; after a stop
        // the remaining items are skipped without being handled.
        drop(routes);
        self.join_workers(workers).await;

        let status = if self.stop.is_stopped() {
            ScanStatus::Aborted
        } else {
            ScanStatus::Finished
        };
        self.log(LogLevel::Info, format!("scan {status} with {} events stored", tally.stored))
            .await;
        Ok(status)
    }

    /// Builds and sets up one module. Any failure fails the whole scan.
    fn prepare(
        &self,
        name: &str,
        tx: &mpsc::UnboundedSender<DispatchMsg>,
    ) -> Result<(Box<dyn ScanModule>, ModuleContext, Watch), String> {
        let factory = self
            .registry
            .get(name)
            .ok_or_else(|| format!("module {name} is not registered"))?;
        let options = ModuleOptions::resolve(&factory.options, self.config.module_overrides(name))
            .map_err(|e| format!("module {name} could not be configured: {e}"))?;
        let ctx = ModuleContext::new(
            &self.scan_id,
            name,
            Arc::clone(&self.target),
            Arc::clone(&self.config),
            tx.clone(),
            self.stop.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.db),
        );
        let mut module = factory.build();
        module
            .setup(&ctx, options)
            .map_err(|e| format!("module {name} failed to start: {e}"))?;
        debug!(scan_id = %self.scan_id, module = name, "Module set up.");
        Ok((module, ctx, factory.watched.clone()))
    }

    /// Stores an event and hands it to every interested module, returning how
    /// many deliveries were made. Duplicates and refused events go nowhere.
    async fn admit(&self, event: Event, routes: &[Route], tally: &mut Tally) -> usize {
        let cap = self.config.max_events;
        if cap > 0 && tally.stored >= cap {
            if !tally.capped {
                tally.capped = true;
                self.log(LogLevel::Warning, format!("event limit of {cap} reached; further events are dropped"))
                    .await;
            }
            return 0;
        }

        match self.db.put(&self.scan_id, event.clone()).await {
            Ok(_) => {}
            Err(StoreError::Duplicate { .. }) => {
                debug!(scan_id = %self.scan_id, hash = %event.hash, "Duplicate event dropped.");
                return 0;
            }
            Err(e) => {
                warn!(scan_id = %self.scan_id, error = %e, "Event refused by store.");
                self.log(LogLevel::Warning, format!("event from {} refused: {e}", event.module))
                    .await;
                return 0;
            }
        }
        tally.stored += 1;

        let event = Arc::new(event);
        let mut delivered = 0;
        for route in routes {
            if route.name == event.module || !route.watch.accepts(&event.event_type) {
                continue;
            }
            if route.inbox.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
            }
        }
        let _ = self.updates.send(ScanUpdate::Event {
            scan_id: self.scan_id.clone(),
            event: (*event).clone(),
        });
        delivered
    }

    /// Waits for every module task. Once the scan is stopping, modules get
    /// `STOP_GRACE` to return before their tasks are cancelled.
    async fn join_workers(&self, workers: Vec<JoinHandle<()>>) {
        let grace_until = self.stop.is_stopped().then(|| Instant::now() + STOP_GRACE);
        for mut worker in workers {
            let joined = match grace_until {
                Some(at) => match tokio::time::timeout_at(at, &mut worker).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        worker.abort();
                        warn!(scan_id = %self.scan_id, "Module ignored the stop request and was cancelled.");
                        self.log(LogLevel::Warning, "a module did not stop in time and was cancelled")
                            .await;
                        continue;
                    }
                },
                None => worker.await,
            };
            if let Err(e) = joined {
                warn!(scan_id = %self.scan_id, error = %e, "Module task ended abnormally.");
            }
        }
    }

    /// Marks a running scan as stopping, as a user abort would.
    async fn request_abort(&self) {
        match self
            .db
            .scan_instance_transition(&self.scan_id, ScanStatus::Running, ScanStatus::AbortRequested)
            .await
        {
            Ok(true) => {
                let _ = self.updates.send(ScanUpdate::Status {
                    scan_id: self.scan_id.clone(),
                    status: ScanStatus::AbortRequested,
                });
            }
            Ok(false) => {}
            Err(e) => error!(scan_id = %self.scan_id, error = %e, "Could not record scan status."),
        }
    }

    async fn try_set_status(&self, status: ScanStatus) -> Result<(), String> {
        self.db
            .scan_instance_set(&self.scan_id, status)
            .await
            .map_err(|e| e.to_string())?;
        let _ = self.updates.send(ScanUpdate::Status {
            scan_id: self.scan_id.clone(),
            status,
        });
        Ok(())
    }

    async fn set_status(&self, status: ScanStatus) {
        if let Err(e) = self.try_set_status(status).await {
            error!(scan_id = %self.scan_id, error = %e, "Could not record scan status.");
        }
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self
            .db
            .scan_log(&self.scan_id, COMPONENT, level, message)
            .await;
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Feeds a module its inbox, one event at a time.
///
/// Every item is acknowledged with `Done`, whether it was handled, failed, or
/// skipped because the scan is stopping. Failures, timeouts and panics are
/// recorded in the scan log and never reach the dispatcher.
async fn module_worker(
    mut module: Box<dyn ScanModule>,
    ctx: ModuleContext,
    mut inbox: mpsc::UnboundedReceiver<Arc<Event>>,
    timeout: Option<Duration>,
) {
    let done = ctx.dispatcher();
    while let Some(event) = inbox.recv().await {
        if !ctx.check_for_stop() {
            let call = module.handle_event(&ctx, &event);
            let outcome = match timeout {
                Some(limit) => AssertUnwindSafe(tokio::time::timeout(limit, call))
                    .catch_unwind()
                    .await
                    .map(|r| r.map_err(|_| ())),
                None => AssertUnwindSafe(call).catch_unwind().await.map(Ok),
            };
            match outcome {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    ctx.error(format!("error handling {}: {e}", event.event_type))
                        .await;
                }
                Ok(Err(())) => {
                    ctx.error(format!("timed out handling {} `{}`", event.event_type, event.data))
                        .await;
                }
                Err(_) => {
                    ctx.error(format!("panicked handling {}", event.event_type))
                        .await;
                }
            }
        }
        let _ = done.send(DispatchMsg::Done);
    }
    debug!(scan_id = ctx.scan_id(), module = ctx.module_name(), "Module finished.");
}

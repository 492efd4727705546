//! End-to-end scans driven through `Scanner` with stub modules and a stub
//! fetcher, so nothing here touches the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use vanguard_osint::config::Config;
use vanguard_osint::core::error::{FetchError, ModuleError, ScanError, StoreError};
use vanguard_osint::core::event::{Event, EventType, extract_tagged_url, fingerprint};
use vanguard_osint::core::fetch::{FetchResponse, Fetcher};
use vanguard_osint::core::graph::{ExportFormat, element_type_discovery, export_scans};
use vanguard_osint::core::module::{ModuleContext, ModuleMeta, ModuleOptions, ScanModule, Watch};
use vanguard_osint::core::registry::{ModuleRegistry, ModuleSelection};
use vanguard_osint::core::scanner::runner::SEED_MODULE;
use vanguard_osint::core::scanner::{ScanRequest, ScanStatus, ScanUpdate, Scanner};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Serves canned bodies by URL and counts requests.
#[derive(Default)]
struct StubFetcher {
    bodies: HashMap<String, String>,
    requests: AtomicUsize,
}

impl StubFetcher {
    fn with(url: &str, body: &str) -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(url.to_string(), body.to_string());
        Self {
            bodies,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.bodies.get(url) {
            Some(body) => Ok(FetchResponse {
                url: url.to_string(),
                status: 200,
                headers: Vec::new(),
                body: body.clone(),
            }),
            None => Ok(FetchResponse {
                url: url.to_string(),
                status: 404,
                ..FetchResponse::default()
            }),
        }
    }
}

type Reaction = fn(&Event) -> Vec<(EventType, String)>;

#[derive(Clone, Copy)]
enum Behaviour {
    /// Emit whatever the reaction returns.
    React(Reaction),
    /// Emit up to 100 events, requesting a stop right after the first.
    Flood,
    /// Sit in the handler until the scan is stopped.
    Stall,
    /// Sleep for this many seconds, ignoring any stop request.
    Sleep(u64),
    Panic,
    /// Emit 100 `FAN` events.
    FanOut,
    /// Request a stop and emit nothing.
    Trip,
}

struct Stub {
    name: &'static str,
    watches: Vec<EventType>,
    produces: Vec<EventType>,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

#[async_trait]
impl ScanModule for Stub {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: self.name,
            summary: "stub",
            use_cases: &["Passive"],
            categories: &[],
            flags: &[],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::Types(self.watches.clone())
    }

    fn produced_events(&self) -> Vec<EventType> {
        self.produces.clone()
    }

    fn setup(&mut self, _: &ModuleContext, _: ModuleOptions) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::React(react) => {
                for (event_type, data) in react(event) {
                    if ctx.emit(ctx.child(event_type, data, event)) {
                        self.accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            Behaviour::Flood => {
                for i in 0..100 {
                    let out = ctx.child(ty("FLOOD"), format!("flood-{i}"), event);
                    if ctx.emit(out) {
                        self.accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    if i == 0 {
                        ctx.stop_signal().request_stop();
                    }
                }
            }
            Behaviour::Stall => {
                while !ctx.check_for_stop() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            Behaviour::Sleep(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            Behaviour::Panic => panic!("stub module blew up on {}", event.data),
            Behaviour::FanOut => {
                for i in 0..100 {
                    if ctx.emit(ctx.child(ty("FAN"), format!("fan-{i}"), event)) {
                        self.accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            Behaviour::Trip => ctx.stop_signal().request_stop(),
        }
        Ok(())
    }
}

/// Counters shared between a registered stub and the test body.
#[derive(Clone, Default)]
struct Counters {
    calls: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

impl Counters {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

fn register(
    registry: &mut ModuleRegistry,
    name: &'static str,
    watches: &[&str],
    produces: &[&str],
    behaviour: Behaviour,
) -> Counters {
    let counters = Counters::default();
    let watches: Vec<EventType> = watches.iter().map(|t| ty(t)).collect();
    let produces: Vec<EventType> = produces.iter().map(|t| ty(t)).collect();
    let shared = counters.clone();
    registry.register(move || -> Box<dyn ScanModule> {
        Box::new(Stub {
            name,
            watches: watches.clone(),
            produces: produces.clone(),
            behaviour,
            calls: Arc::clone(&shared.calls),
            accepted: Arc::clone(&shared.accepted),
        })
    });
    counters
}

fn ty(name: &str) -> EventType {
    EventType::from(name.to_string())
}

fn config_in(dir: &TempDir) -> Config {
    Config {
        data_dir: Some(dir.path().to_path_buf()),
        ..Config::default()
    }
}

fn request(target: &str, modules: &[&str]) -> ScanRequest {
    ScanRequest {
        name: format!("scan of {target}"),
        target: target.to_string(),
        selection: ModuleSelection::Modules(modules.iter().map(|m| m.to_string()).collect()),
        echo_stdout: false,
    }
}

async fn wait_for_status(scanner: &Scanner, scan_id: &str, wanted: ScanStatus) {
    for _ in 0..500 {
        if scanner.db().scan_instance_get(scan_id).await.unwrap().status == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {scan_id} never reached {wanted}");
}

fn react_a(event: &Event) -> Vec<(EventType, String)> {
    vec![(ty("A_OUT"), format!("a:{}", event.data))]
}

fn react_b(event: &Event) -> Vec<(EventType, String)> {
    vec![(ty("B_OUT"), format!("b:{}", event.data))]
}

fn react_c(event: &Event) -> Vec<(EventType, String)> {
    vec![(ty("C_OUT"), format!("c:{}", event.data))]
}

/// Registry with a three-step chain: INTERNET_NAME -> A_OUT -> B_OUT -> C_OUT.
fn chain_registry() -> (ModuleRegistry, [Counters; 3]) {
    let mut registry = ModuleRegistry::new();
    let a = register(&mut registry, "a", &["INTERNET_NAME"], &["A_OUT"], Behaviour::React(react_a));
    let b = register(&mut registry, "b", &["A_OUT"], &["B_OUT"], Behaviour::React(react_b));
    let c = register(&mut registry, "c", &["B_OUT"], &["C_OUT"], Behaviour::React(react_c));
    (registry, [a, b, c])
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chained_modules_run_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, [a, b, c]) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));
    let mut updates = scanner.subscribe();

    let scan_id = scanner.start_scan(request("example.com", &["a", "b", "c"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);

    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));

    let db = scanner.db();
    let rows = db.scan_result_event(&scan_id, None, false).await.unwrap();
    let types: Vec<&str> = rows.iter().map(|r| r.event.event_type.as_str()).collect();
    assert_eq!(types, vec!["INTERNET_NAME", "A_OUT", "B_OUT", "C_OUT"]);
    assert_eq!(rows[0].event.module, SEED_MODULE);
    assert_eq!(rows[3].event.data, "c:b:a:example.com");
    assert_eq!(rows[3].source_data, "b:a:example.com");

    let settings = db.scan_config_get(&scan_id).await.unwrap().unwrap();
    assert_eq!(settings.modules, vec!["_stor_db", "a", "b", "c"]);

    // The storage module journals the root too.
    let journal = dir.path().join("journals").join(format!("{scan_id}.jsonl"));
    let lines = std::fs::read_to_string(journal).unwrap();
    assert_eq!(lines.lines().count(), 5);

    let mut last_status = None;
    while let Ok(update) = updates.try_recv() {
        if let ScanUpdate::Status { status, .. } = update {
            last_status = Some(status);
        }
    }
    assert_eq!(last_status, Some(ScanStatus::Finished));
}

#[tokio::test]
async fn every_parent_is_stored_and_not_younger_than_its_child() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));
    let scan_id = scanner.start_scan(request("example.com", &["a", "b", "c"])).await.unwrap();
    scanner.wait(&scan_id).await.unwrap();

    let db = scanner.db();
    for row in db.scan_result_event(&scan_id, None, false).await.unwrap() {
        let parent_hash = row.event.source_hash.clone().unwrap();
        let parent = db.event(&scan_id, &parent_hash).await.unwrap();
        assert!(parent.generated <= row.event.generated);
        assert_eq!(parent.data, row.source_data);
    }
}

#[tokio::test]
async fn modules_never_receive_their_own_events() {
    fn subdomain(event: &Event) -> Vec<(EventType, String)> {
        if event.data.starts_with("www.") {
            Vec::new()
        } else {
            vec![(EventType::InternetName, format!("www.{}", event.data))]
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    let echo = register(&mut registry, "echo", &["INTERNET_NAME"], &["INTERNET_NAME"], Behaviour::React(subdomain));
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner.start_scan(request("example.com", &["echo"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);

    assert_eq!(echo.calls(), 1);
    let names = scanner
        .db()
        .scan_result_event(&scan_id, Some(&EventType::InternetName), false)
        .await
        .unwrap();
    assert_eq!(names.len(), 2);
}

#[tokio::test]
async fn duplicate_events_are_stored_once() {
    fn twice(_: &Event) -> Vec<(EventType, String)> {
        vec![(ty("DUP"), "same".into()), (ty("DUP"), "same".into())]
    }

    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    let dup = register(&mut registry, "dup", &["INTERNET_NAME"], &["DUP"], Behaviour::React(twice));
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner.start_scan(request("example.com", &["dup"])).await.unwrap();
    scanner.wait(&scan_id).await.unwrap();

    assert_eq!(dup.accepted(), 2);
    let db = scanner.db();
    let rows = db.scan_result_event(&scan_id, Some(&ty("DUP")), false).await.unwrap();
    assert_eq!(rows.len(), 1);

    let again = rows[0].event.clone();
    assert!(matches!(db.put(&scan_id, again).await, Err(StoreError::Duplicate { .. })));
}

#[tokio::test]
async fn blocklisted_target_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::with(
        "http://www.voipbl.org/update",
        "# VoIPBL\n192.0.2.0/24\n",
    ));
    let scanner = Scanner::new(ModuleRegistry::builtin(), config_in(&dir))
        .with_fetcher(Arc::clone(&fetcher) as Arc<dyn Fetcher>);

    let scan_id = scanner.start_scan(request("192.0.2.1", &["voipbl"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);

    let db = scanner.db();
    let hits = db
        .scan_result_event(&scan_id, Some(&EventType::MaliciousIpaddr), false)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].event.data.starts_with("VoIPBL Publicly Accessible PBX List [192.0.2.1]"));
    assert_eq!(extract_tagged_url(&hits[0].event.data), Some("http://www.voipbl.org/update"));
    assert_eq!(hits[0].source_data, "192.0.2.1");

    // The list is cached for the next scan.
    let second = scanner.start_scan(request("192.0.2.1", &["voipbl"])).await.unwrap();
    scanner.wait(&second).await.unwrap();
    assert_eq!(fetcher.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unlisted_target_produces_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::with("http://www.voipbl.org/update", "198.51.100.7/32\n"));
    let scanner = Scanner::new(ModuleRegistry::builtin(), config_in(&dir)).with_fetcher(fetcher);

    let scan_id = scanner.start_scan(request("192.0.2.1", &["voipbl"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);
    let rows = scanner.db().scan_result_event(&scan_id, None, false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event.event_type, EventType::IpAddress);
}

#[tokio::test]
async fn stop_request_from_a_module_aborts_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    let flood = register(&mut registry, "flood", &["INTERNET_NAME"], &["FLOOD"], Behaviour::Flood);
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner.start_scan(request("example.com", &["flood"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Aborted);

    assert_eq!(flood.accepted(), 1);
    let stored = scanner
        .db()
        .scan_result_event(&scan_id, Some(&ty("FLOOD")), false)
        .await
        .unwrap();
    assert!(stored.len() <= 1);
}

#[tokio::test]
async fn stop_scan_aborts_a_running_scan() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    register(&mut registry, "stall", &["INTERNET_NAME"], &[], Behaviour::Stall);
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner.start_scan(request("example.com", &["stall"])).await.unwrap();
    wait_for_status(&scanner, &scan_id, ScanStatus::Running).await;

    // False positives cannot be changed while the scan runs.
    let seed = fingerprint(&EventType::InternetName, "example.com", SEED_MODULE);
    assert!(matches!(
        scanner.db().set_false_positive(&scan_id, &[seed], true).await,
        Err(StoreError::ScanNotFinished(_))
    ));
    assert!(matches!(
        scanner.delete_scan(&scan_id).await,
        Err(ScanError::InvalidState { .. })
    ));

    scanner.stop_scan(&scan_id).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Aborted);
    assert!(scanner.stop_scan(&scan_id).await.is_err());

    let logs = scanner.db().scan_logs(&scan_id, None).await.unwrap();
    assert!(logs.iter().any(|l| l.message.contains("abort requested")));
}

#[tokio::test]
async fn false_positives_cascade_and_guard_unflagging() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));
    let scan_id = scanner.start_scan(request("example.com", &["a", "b", "c"])).await.unwrap();
    scanner.wait(&scan_id).await.unwrap();

    let db = scanner.db();
    let rows = db.scan_result_event(&scan_id, None, false).await.unwrap();
    let hash_of = |t: &str| {
        rows.iter()
            .find(|r| r.event.event_type.as_str() == t)
            .map(|r| r.event.hash.clone())
            .unwrap()
    };
    let (a, b, c) = (hash_of("A_OUT"), hash_of("B_OUT"), hash_of("C_OUT"));

    let mut flagged = db.set_false_positive(&scan_id, &[a.clone()], true).await.unwrap();
    flagged.sort();
    let mut expected = vec![a.clone(), b.clone(), c.clone()];
    expected.sort();
    assert_eq!(flagged, expected);

    let visible = db.scan_result_event(&scan_id, None, true).await.unwrap();
    assert_eq!(visible.len(), 1);

    assert!(matches!(
        db.set_false_positive(&scan_id, &[b.clone()], false).await,
        Err(StoreError::FalsePositiveParent { .. })
    ));

    db.set_false_positive(&scan_id, &[a, b], false).await.unwrap();
    let visible = db.scan_result_event(&scan_id, None, true).await.unwrap();
    assert_eq!(visible.len(), 4);
}

#[tokio::test]
async fn discovery_tree_follows_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));
    let scan_id = scanner.start_scan(request("example.com", &["a", "b", "c"])).await.unwrap();
    scanner.wait(&scan_id).await.unwrap();

    let db = scanner.db();
    let discovery = element_type_discovery(&db, &scan_id, Some(&ty("C_OUT"))).await.unwrap();
    assert_eq!(discovery.tree.len(), 1);
    let seed = &discovery.tree[0];
    assert_eq!(discovery.data[&seed.name].event.event_type, EventType::InternetName);
    let a = &seed.children[0];
    let b = &a.children[0];
    let c = &b.children[0];
    assert!(c.children.is_empty());
    assert_eq!(discovery.data[&c.name].event.data, "c:b:a:example.com");
    assert_eq!(discovery.data.len(), 4);

    let exported = export_scans(&db, &[scan_id.clone()], ExportFormat::Tree).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(value[0]["scan_id"], scan_id.as_str());
    assert_eq!(value[0]["target"], "example.com");

    let gexf = export_scans(&db, &[scan_id], ExportFormat::Gexf).await.unwrap();
    assert!(gexf.contains("c:b:a:example.com"));
}

#[tokio::test]
async fn setup_failure_fails_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let (registry, [a, _, _]) = chain_registry();
    let config = Config {
        data_dir: Some(blocker),
        ..Config::default()
    };
    let scanner = Scanner::new(registry, config);

    let scan_id = scanner.start_scan(request("example.com", &["a"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::ErrorFailed);
    assert_eq!(a.calls(), 0);

    let errors = scanner.db().scan_errors(&scan_id, None).await.unwrap();
    assert!(errors.iter().any(|e| e.message.contains("_stor_db")));
}

#[tokio::test]
async fn finished_scans_can_be_rerun_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, [a, _, _]) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));
    let first = scanner.start_scan(request("example.com", &["a"])).await.unwrap();
    scanner.wait(&first).await.unwrap();

    let clone = scanner.clone_scan(&first).await.unwrap();
    assert_eq!(clone.selection, ModuleSelection::Modules(vec!["a".into()]));
    assert_eq!(clone.target, "example.com");

    let second = scanner.rerun_scan(&first).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(scanner.wait(&second).await.unwrap(), ScanStatus::Finished);
    assert_eq!(a.calls(), 2);

    let more = scanner.rerun_scans(&[first.clone(), second.clone()]).await.unwrap();
    assert_eq!(more.len(), 2);
    for id in &more {
        scanner.wait(id).await.unwrap();
    }
    assert_eq!(a.calls(), 4);

    scanner.delete_scan(&first).await.unwrap();
    assert!(scanner.db().scan_instance_get(&first).await.is_err());
    assert_eq!(scanner.db().scan_instance_list().await.len(), 3);
}

async fn log_messages(scanner: &Scanner, scan_id: &str) -> Vec<String> {
    scanner
        .db()
        .scan_logs(scan_id, None)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect()
}

#[tokio::test]
async fn panicking_module_does_not_take_the_scan_down() {
    let dir = tempfile::tempdir().unwrap();
    let (mut registry, [a, b, c]) = chain_registry();
    register(&mut registry, "boom", &["INTERNET_NAME"], &[], Behaviour::Panic);
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner
        .start_scan(request("example.com", &["boom", "a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);

    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    let logs = log_messages(&scanner, &scan_id).await;
    assert!(logs.iter().any(|m| m.contains("panicked handling INTERNET_NAME")), "{logs:?}");
}

#[tokio::test]
async fn slow_handler_is_cut_off_by_the_module_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    register(&mut registry, "sleeper", &["INTERNET_NAME"], &[], Behaviour::Sleep(30));
    let scanner = Scanner::new(
        registry,
        Config {
            module_timeout_secs: 1,
            ..config_in(&dir)
        },
    );

    let started = Instant::now();
    let scan_id = scanner.start_scan(request("example.com", &["sleeper"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());

    let logs = log_messages(&scanner, &scan_id).await;
    assert!(logs.iter().any(|m| m.contains("timed out handling INTERNET_NAME")), "{logs:?}");
}

#[tokio::test]
async fn scan_time_limit_cancels_a_module_that_ignores_the_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    register(&mut registry, "sleeper", &["INTERNET_NAME"], &[], Behaviour::Sleep(30));
    let scanner = Scanner::new(
        registry,
        Config {
            max_scan_secs: 1,
            module_timeout_secs: 0,
            ..config_in(&dir)
        },
    );
    let mut updates = scanner.subscribe();

    let started = Instant::now();
    let scan_id = scanner.start_scan(request("example.com", &["sleeper"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Aborted);
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());

    let mut statuses = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let ScanUpdate::Status { scan_id: id, status } = update {
            if id == scan_id {
                statuses.push(status);
            }
        }
    }
    assert!(statuses.contains(&ScanStatus::AbortRequested), "{statuses:?}");
    assert_eq!(statuses.last(), Some(&ScanStatus::Aborted));

    let logs = log_messages(&scanner, &scan_id).await;
    assert!(logs.iter().any(|m| m.contains("time limit")), "{logs:?}");
    assert!(logs.iter().any(|m| m.contains("did not stop in time")), "{logs:?}");
}

#[tokio::test]
async fn stop_leaves_a_queued_backlog_unprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ModuleRegistry::new();
    let fan = register(&mut registry, "fan", &["INTERNET_NAME"], &["FAN"], Behaviour::FanOut);
    let trip = register(&mut registry, "trip", &["FAN"], &[], Behaviour::Trip);
    let scanner = Scanner::new(registry, config_in(&dir));

    let scan_id = scanner.start_scan(request("example.com", &["fan", "trip"])).await.unwrap();
    assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Aborted);

    assert_eq!(fan.calls(), 1);
    assert_eq!(trip.calls(), 1);
}

#[tokio::test]
async fn ended_scans_are_no_longer_tracked_as_running() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _) = chain_registry();
    let scanner = Scanner::new(registry, config_in(&dir));

    for _ in 0..3 {
        let scan_id = scanner.start_scan(request("example.com", &["a"])).await.unwrap();
        assert_eq!(scanner.wait(&scan_id).await.unwrap(), ScanStatus::Finished);
        assert!(matches!(
            scanner.stop_scan(&scan_id).await,
            Err(ScanError::NotRunning(_))
        ));
    }
    assert_eq!(scanner.running_count(), 0);
}

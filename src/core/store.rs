// src/core/store.rs

//! In-process scan store: scan instances, their configuration snapshots, the
//! provenance graph of events, and per-scan logs.
//!
//! All writes go through one `RwLock`, so concurrent `put` calls are
//! serialised and the `(type, data, module)` uniqueness check cannot race.
//! Read views exclude the ROOT event unless stated otherwise.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::core::catalogue::{self, EventTypeDetail};
use crate::core::error::StoreError;
use crate::core::event::{Event, EventType, ROOT_HASH};
use crate::core::scanner::ScanStatus;
use crate::core::target::{Target, TargetType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInstance {
    pub id: String,
    pub name: String,
    pub target: String,
    pub target_type: TargetType,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub status: ScanStatus,
}

impl ScanInstance {
    pub fn new(id: impl Into<String>, name: impl Into<String>, target: &Target) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target: target.value.clone(),
            target_type: target.target_type,
            created: Utc::now(),
            started: None,
            ended: None,
            status: ScanStatus::Created,
        }
    }
}

/// What a scan was started with, kept so it can be re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub modules: Vec<String>,
    pub config: Config,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanListing {
    #[serde(flatten)]
    pub instance: ScanInstance,
    pub event_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub generated: DateTime<Utc>,
    pub component: String,
    pub level: LogLevel,
    pub message: String,
}

/// An event together with the value of the event that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    #[serde(flatten)]
    pub event: Event,
    pub source_data: String,
    pub source_type: Option<EventType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueResult {
    pub data: String,
    pub event_type: EventType,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeSummary {
    pub event_type: EventType,
    pub description: &'static str,
    pub last_seen: DateTime<Utc>,
    pub total: usize,
    pub unique: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryBucket {
    pub hour: DateTime<Utc>,
    pub event_type: EventType,
    pub count: usize,
}

/// Ancestry of a set of events: every event on the way up, and a map from
/// parent hash to child hashes. The map includes a `ROOT` key for the
/// top-level events; `data` never holds the root itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMap {
    pub data: BTreeMap<String, ResultRow>,
    pub parent_child: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub scan_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Exact value, a `*` wildcard pattern, or a `/regex/`.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub scan_id: String,
    #[serde(flatten)]
    pub row: ResultRow,
}

struct ScanRecord {
    instance: ScanInstance,
    settings: Option<ScanSettings>,
    events: Vec<Event>,
    index: HashMap<String, usize>,
    children: HashMap<String, Vec<String>>,
    logs: Vec<LogEntry>,
}

impl ScanRecord {
    fn new(instance: ScanInstance) -> Self {
        Self {
            instance,
            settings: None,
            events: Vec::new(),
            index: HashMap::new(),
            children: HashMap::new(),
            logs: Vec::new(),
        }
    }

    fn event(&self, hash: &str) -> Option<&Event> {
        self.index.get(hash).map(|&i| &self.events[i])
    }

    fn require(&self, hash: &str) -> Result<&Event, StoreError> {
        self.event(hash)
            .ok_or_else(|| StoreError::UnknownEvent(hash.to_string()))
    }

    fn row(&self, event: &Event) -> ResultRow {
        let source = event.source_hash.as_deref().and_then(|h| self.event(h));
        ResultRow {
            event: event.clone(),
            source_data: source.map(|e| e.data.clone()).unwrap_or_default(),
            source_type: source.map(|e| e.event_type.clone()),
        }
    }

    fn results(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| !e.is_root())
    }

    /// Every event below `ids`, breadth first, not including `ids` themselves.
    fn descendants(&self, ids: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut queue: VecDeque<&str> = ids.iter().map(String::as_str).collect();
        let mut found = Vec::new();
        while let Some(hash) = queue.pop_front() {
            for child in self.children.get(hash).into_iter().flatten() {
                if seen.insert(child.as_str()) {
                    found.push(child.clone());
                    queue.push_back(child.as_str());
                }
            }
        }
        found
    }

    /// Hashes of every ancestor of `hash` below the root, nearest first.
    fn ancestors(&self, hash: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut current = self.event(hash).and_then(|e| e.source_hash.clone());
        while let Some(parent) = current {
            if parent == ROOT_HASH || found.contains(&parent) {
                break;
            }
            current = self.event(&parent).and_then(|e| e.source_hash.clone());
            found.push(parent);
        }
        found
    }

    fn unique(&self, event_type: Option<&EventType>, filter_fp: bool) -> Vec<UniqueResult> {
        let mut counts: BTreeMap<(EventType, String), usize> = BTreeMap::new();
        for event in self.results() {
            if event_type.is_some_and(|t| *t != event.event_type) || (filter_fp && event.false_positive) {
                continue;
            }
            *counts
                .entry((event.event_type.clone(), event.data.clone()))
                .or_default() += 1;
        }
        counts
            .into_iter()
            .map(|((event_type, data), count)| UniqueResult {
                data,
                event_type,
                count,
            })
            .collect()
    }
}

fn apply_status(instance: &mut ScanInstance, status: ScanStatus) {
    let now = Utc::now();
    instance.status = status;
    if status == ScanStatus::Running && instance.started.is_none() {
        instance.started = Some(now);
    }
    if status.is_terminal() {
        instance.ended = Some(now);
    }
}

enum ValueMatch {
    Exact(String),
    Pattern(Regex),
}

impl ValueMatch {
    fn parse(value: &str) -> Result<Self, StoreError> {
        if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
            let inner = &value[1..value.len() - 1];
            return Regex::new(inner)
                .map(ValueMatch::Pattern)
                .map_err(|e| StoreError::InvalidPattern(e.to_string()));
        }
        if value.contains('*') {
            let pattern = value
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            return Regex::new(&format!("(?i)^{pattern}$"))
                .map(ValueMatch::Pattern)
                .map_err(|e| StoreError::InvalidPattern(e.to_string()));
        }
        Ok(ValueMatch::Exact(value.to_string()))
    }

    fn matches(&self, data: &str) -> bool {
        match self {
            ValueMatch::Exact(v) => v == data,
            ValueMatch::Pattern(re) => re.is_match(data),
        }
    }
}

#[derive(Default)]
pub struct ScanDb {
    scans: RwLock<HashMap<String, ScanRecord>>,
}

fn unknown(scan_id: &str) -> StoreError {
    StoreError::UnknownScan(scan_id.to_string())
}

impl ScanDb {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Scan instances ---

    pub async fn scan_instance_create(&self, instance: ScanInstance) -> Result<(), StoreError> {
        let mut scans = self.scans.write().await;
        if scans.contains_key(&instance.id) {
            return Err(StoreError::ScanExists(instance.id));
        }
        debug!(scan_id = %instance.id, "Scan instance created.");
        scans.insert(instance.id.clone(), ScanRecord::new(instance));
        Ok(())
    }

    pub async fn scan_instance_get(&self, scan_id: &str) -> Result<ScanInstance, StoreError> {
        let scans = self.scans.read().await;
        scans
            .get(scan_id)
            .map(|r| r.instance.clone())
            .ok_or_else(|| unknown(scan_id))
    }

    /// Records a new status, stamping the start and end times as they occur.
    pub async fn scan_instance_set(&self, scan_id: &str, status: ScanStatus) -> Result<ScanInstance, StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;
        apply_status(&mut record.instance, status);
        Ok(record.instance.clone())
    }

    /// Moves the scan to `to` only if it is currently in `from`.
    pub async fn scan_instance_transition(
        &self,
        scan_id: &str,
        from: ScanStatus,
        to: ScanStatus,
    ) -> Result<bool, StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;
        if record.instance.status != from {
            return Ok(false);
        }
        apply_status(&mut record.instance, to);
        Ok(true)
    }

    /// All scans, newest first.
    pub async fn scan_instance_list(&self) -> Vec<ScanListing> {
        let scans = self.scans.read().await;
        let mut listings: Vec<ScanListing> = scans
            .values()
            .map(|r| ScanListing {
                instance: r.instance.clone(),
                event_count: r.results().count(),
            })
            .collect();
        listings.sort_by(|a, b| {
            b.instance
                .created
                .cmp(&a.instance.created)
                .then_with(|| a.instance.id.cmp(&b.instance.id))
        });
        listings
    }

    pub async fn scan_instance_delete(&self, scan_id: &str) -> Result<ScanInstance, StoreError> {
        let mut scans = self.scans.write().await;
        scans
            .remove(scan_id)
            .map(|r| r.instance)
            .ok_or_else(|| unknown(scan_id))
    }

    pub async fn scan_config_set(&self, scan_id: &str, settings: ScanSettings) -> Result<(), StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;
        record.settings = Some(settings);
        Ok(())
    }

    pub async fn scan_config_get(&self, scan_id: &str) -> Result<Option<ScanSettings>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        Ok(record.settings.clone())
    }

    // --- Events ---

    /// Stores an event, returning its hash.
    ///
    /// Duplicate `(type, data, module)` triples and events whose parent is not
    /// stored are refused.
    pub async fn put(&self, scan_id: &str, event: Event) -> Result<String, StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;

        if record.index.contains_key(&event.hash) {
            return Err(StoreError::Duplicate {
                event_type: event.event_type.to_string(),
                data: event.data,
                module: event.module,
            });
        }

        if !event.is_root() {
            let parent = event.source_hash.clone().unwrap_or_default();
            if !record.index.contains_key(&parent) {
                return Err(StoreError::MissingParent(parent));
            }
            record
                .children
                .entry(parent)
                .or_default()
                .push(event.hash.clone());
        }

        let hash = event.hash.clone();
        record.index.insert(hash.clone(), record.events.len());
        record.events.push(event);
        Ok(hash)
    }

    pub async fn event(&self, scan_id: &str, hash: &str) -> Result<Event, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        record.require(hash).cloned()
    }

    /// Stored results in insertion order, optionally of one type and without
    /// false positives.
    pub async fn scan_result_event(
        &self,
        scan_id: &str,
        event_type: Option<&EventType>,
        filter_fp: bool,
    ) -> Result<Vec<ResultRow>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        Ok(record
            .results()
            .filter(|e| event_type.is_none_or(|t| *t == e.event_type))
            .filter(|e| !(filter_fp && e.false_positive))
            .map(|e| record.row(e))
            .collect())
    }

    /// Distinct `(type, value)` pairs with how often each was seen.
    pub async fn scan_result_event_unique(
        &self,
        scan_id: &str,
        event_type: Option<&EventType>,
        filter_fp: bool,
    ) -> Result<Vec<UniqueResult>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        Ok(record.unique(event_type, filter_fp))
    }

    /// Transitive descendants of `ids`.
    pub async fn children_of(&self, scan_id: &str, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        for id in ids {
            record.require(id)?;
        }
        Ok(record.descendants(ids))
    }

    /// Transitive ancestry of `ids` as a parent/child map.
    pub async fn sources_of(&self, scan_id: &str, ids: &[String]) -> Result<SourceMap, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut map = SourceMap::default();

        for id in ids {
            let mut current = record.require(id)?;
            loop {
                if current.is_root() {
                    break;
                }
                map.data.insert(current.hash.clone(), record.row(current));
                let Some(parent) = current.source_hash.as_deref() else {
                    break;
                };
                let siblings = map.parent_child.entry(parent.to_string()).or_default();
                if !siblings.contains(&current.hash) {
                    siblings.push(current.hash.clone());
                }
                if map.data.contains_key(parent) {
                    break;
                }
                match record.event(parent) {
                    Some(p) => current = p,
                    None => break,
                }
            }
        }
        Ok(map)
    }

    /// Immediate parents of `ids`, excluding the root.
    pub async fn sources_direct(&self, scan_id: &str, ids: &[String]) -> Result<Vec<ResultRow>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for id in ids {
            let event = record.require(id)?;
            let Some(parent) = event.source_hash.as_deref().and_then(|h| record.event(h)) else {
                continue;
            };
            if !parent.is_root() && seen.insert(parent.hash.clone()) {
                rows.push(record.row(parent));
            }
        }
        Ok(rows)
    }

    /// Flags or unflags `ids` and all of their descendants as false positives.
    ///
    /// Only ended scans can be changed. Unflagging is refused while any
    /// ancestor of a requested event is still flagged, unless that ancestor is
    /// part of the same request. Returns every hash that was updated.
    pub async fn set_false_positive(
        &self,
        scan_id: &str,
        ids: &[String],
        flag: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;

        let status = record.instance.status;
        if !status.is_terminal() {
            return Err(StoreError::ScanNotFinished(status));
        }
        for id in ids {
            if id == ROOT_HASH {
                return Err(StoreError::UnknownEvent(id.clone()));
            }
            record.require(id)?;
        }

        if !flag {
            let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
            for id in ids {
                for ancestor in record.ancestors(id) {
                    if requested.contains(ancestor.as_str()) {
                        continue;
                    }
                    if record.event(&ancestor).is_some_and(|e| e.false_positive) {
                        return Err(StoreError::FalsePositiveParent {
                            event: id.clone(),
                            ancestor,
                        });
                    }
                }
            }
        }

        let mut affected = ids.to_vec();
        affected.extend(record.descendants(ids));
        for hash in &affected {
            if let Some(&i) = record.index.get(hash) {
                record.events[i].false_positive = flag;
            }
        }
        debug!(scan_id, flag, count = affected.len(), "False-positive flag updated.");
        Ok(affected)
    }

    // --- Aggregate views ---

    pub async fn result_summary(&self, scan_id: &str) -> Result<Vec<TypeSummary>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut groups: BTreeMap<&EventType, (DateTime<Utc>, usize, HashSet<&str>)> = BTreeMap::new();
        for event in record.results() {
            let entry = groups
                .entry(&event.event_type)
                .or_insert_with(|| (event.generated, 0, HashSet::new()));
            entry.0 = entry.0.max(event.generated);
            entry.1 += 1;
            entry.2.insert(event.data.as_str());
        }
        Ok(groups
            .into_iter()
            .map(|(event_type, (last_seen, total, unique))| TypeSummary {
                event_type: event_type.clone(),
                description: catalogue::describe(event_type),
                last_seen,
                total,
                unique: unique.len(),
            })
            .collect())
    }

    pub async fn results_by_type(&self, scan_id: &str) -> Result<BTreeMap<EventType, Vec<ResultRow>>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut grouped: BTreeMap<EventType, Vec<ResultRow>> = BTreeMap::new();
        for event in record.results() {
            grouped
                .entry(event.event_type.clone())
                .or_default()
                .push(record.row(event));
        }
        Ok(grouped)
    }

    pub async fn unique_results_by_type(
        &self,
        scan_id: &str,
    ) -> Result<BTreeMap<EventType, Vec<UniqueResult>>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut grouped: BTreeMap<EventType, Vec<UniqueResult>> = BTreeMap::new();
        for unique in record.unique(None, false) {
            grouped.entry(unique.event_type.clone()).or_default().push(unique);
        }
        Ok(grouped)
    }

    /// Number of results of each type per hour.
    pub async fn result_history(&self, scan_id: &str) -> Result<Vec<HistoryBucket>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        let mut buckets: BTreeMap<(DateTime<Utc>, EventType), usize> = BTreeMap::new();
        for event in record.results() {
            let secs = event.generated.timestamp();
            let hour = DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(event.generated);
            *buckets.entry((hour, event.event_type.clone())).or_default() += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|((hour, event_type), count)| HistoryBucket {
                hour,
                event_type,
                count,
            })
            .collect())
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<SearchHit>, StoreError> {
        let matcher = criteria.value.as_deref().map(ValueMatch::parse).transpose()?;
        let scans = self.scans.read().await;

        let mut ids: Vec<&String> = match &criteria.scan_id {
            Some(id) => {
                let (key, _) = scans.get_key_value(id).ok_or_else(|| unknown(id))?;
                vec![key]
            }
            None => scans.keys().collect(),
        };
        ids.sort();

        let mut hits = Vec::new();
        for id in ids {
            let record = &scans[id];
            for event in record.results() {
                if criteria.event_type.as_ref().is_some_and(|t| *t != event.event_type) {
                    continue;
                }
                if matcher.as_ref().is_some_and(|m| !m.matches(&event.data)) {
                    continue;
                }
                hits.push(SearchHit {
                    scan_id: id.clone(),
                    row: record.row(event),
                });
            }
        }
        Ok(hits)
    }

    pub fn event_types(&self) -> Vec<EventTypeDetail> {
        catalogue::all()
    }

    // --- Logs ---

    pub async fn scan_log(
        &self,
        scan_id: &str,
        component: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), StoreError> {
        let mut scans = self.scans.write().await;
        let record = scans.get_mut(scan_id).ok_or_else(|| unknown(scan_id))?;
        record.logs.push(LogEntry {
            generated: Utc::now(),
            component: component.to_string(),
            level,
            message: message.into(),
        });
        Ok(())
    }

    /// The most recent `limit` log entries, oldest first.
    pub async fn scan_logs(&self, scan_id: &str, limit: Option<usize>) -> Result<Vec<LogEntry>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        Ok(tail(record.logs.iter(), limit))
    }

    pub async fn scan_errors(&self, scan_id: &str, limit: Option<usize>) -> Result<Vec<LogEntry>, StoreError> {
        let scans = self.scans.read().await;
        let record = scans.get(scan_id).ok_or_else(|| unknown(scan_id))?;
        Ok(tail(
            record.logs.iter().filter(|l| l.level == LogLevel::Error),
            limit,
        ))
    }
}

fn tail<'a>(entries: impl DoubleEndedIterator<Item = &'a LogEntry>, limit: Option<usize>) -> Vec<LogEntry> {
    let mut out: Vec<LogEntry> = entries.rev().take(limit.unwrap_or(usize::MAX)).cloned().collect();
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: &str = "scan-1";

    async fn scan_with_chain() -> (ScanDb, Vec<String>) {
        let db = ScanDb::new();
        let target = Target::parse("example.com").unwrap();
        db.scan_instance_create(ScanInstance::new(SCAN, "test", &target))
            .await
            .unwrap();
        let root = Event::root("example.com");
        db.put(SCAN, root.clone()).await.unwrap();
        let a = Event::new(EventType::InternetName, "example.com", "seed", &root);
        let b = Event::new(EventType::IpAddress, "192.0.2.1", "dns", &a);
        let c = Event::new(EventType::MaliciousIpaddr, "listed", "voipbl", &b);
        let mut hashes = Vec::new();
        for e in [a, b, c] {
            hashes.push(db.put(SCAN, e).await.unwrap());
        }
        (db, hashes)
    }

    async fn finish(db: &ScanDb) {
        db.scan_instance_set(SCAN, ScanStatus::Finished).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_triples_are_stored_once() {
        let (db, _) = scan_with_chain().await;
        let root = db.event(SCAN, ROOT_HASH).await.unwrap();
        let again = Event::new(EventType::InternetName, "example.com", "seed", &root);
        assert!(matches!(
            db.put(SCAN, again).await,
            Err(StoreError::Duplicate { .. })
        ));
        let rows = db
            .scan_result_event(SCAN, Some(&EventType::InternetName), false)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn orphans_are_refused() {
        let (db, _) = scan_with_chain().await;
        let stranger = Event::root("elsewhere");
        let mut orphan = Event::new(EventType::IpAddress, "10.0.0.1", "dns", &stranger);
        orphan.source_hash = Some("missing".into());
        assert_eq!(
            db.put(SCAN, orphan).await,
            Err(StoreError::MissingParent("missing".into()))
        );
    }

    #[tokio::test]
    async fn flag_cascades_to_descendants() {
        let (db, h) = scan_with_chain().await;
        finish(&db).await;
        let affected = db.set_false_positive(SCAN, &h[1..2], true).await.unwrap();
        assert_eq!(affected, vec![h[1].clone(), h[2].clone()]);

        let children = db.children_of(SCAN, &h[1..2]).await.unwrap();
        for child in children {
            assert!(db.event(SCAN, &child).await.unwrap().false_positive);
        }
        assert!(!db.event(SCAN, &h[0]).await.unwrap().false_positive);
    }

    #[tokio::test]
    async fn unflag_is_refused_while_an_ancestor_is_flagged() {
        let (db, h) = scan_with_chain().await;
        finish(&db).await;
        db.set_false_positive(SCAN, &h[0..1], true).await.unwrap();

        let err = db.set_false_positive(SCAN, &h[2..3], false).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::FalsePositiveParent {
                event: h[2].clone(),
                ancestor: h[1].clone()
            }
        );

        db.set_false_positive(SCAN, &h[0..1], false).await.unwrap();
        assert!(!db.event(SCAN, &h[2]).await.unwrap().false_positive);
    }

    #[tokio::test]
    async fn false_positives_need_an_ended_scan() {
        let (db, h) = scan_with_chain().await;
        db.scan_instance_set(SCAN, ScanStatus::Running).await.unwrap();
        assert_eq!(
            db.set_false_positive(SCAN, &h[..1], true).await,
            Err(StoreError::ScanNotFinished(ScanStatus::Running))
        );
    }

    #[tokio::test]
    async fn sources_include_root_key_but_not_root_data() {
        let (db, h) = scan_with_chain().await;
        let map = db.sources_of(SCAN, &h[2..3]).await.unwrap();
        assert_eq!(map.data.len(), 3);
        assert!(!map.data.contains_key(ROOT_HASH));
        assert_eq!(map.parent_child[ROOT_HASH], vec![h[0].clone()]);
        assert_eq!(map.parent_child[&h[0]], vec![h[1].clone()]);
        assert_eq!(map.parent_child[&h[1]], vec![h[2].clone()]);

        let direct = db.sources_direct(SCAN, &h[2..3]).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].event.data, "192.0.2.1");
        assert_eq!(direct[0].source_data, "example.com");
    }

    #[tokio::test]
    async fn summaries_skip_root() {
        let (db, _) = scan_with_chain().await;
        let summary = db.result_summary(SCAN).await.unwrap();
        assert_eq!(summary.len(), 3);
        assert!(summary.iter().all(|s| s.event_type != EventType::Root));

        let by_type = db.results_by_type(SCAN).await.unwrap();
        assert!(!by_type.contains_key(&EventType::Root));
        let unique = db.unique_results_by_type(SCAN).await.unwrap();
        assert_eq!(unique[&EventType::IpAddress][0].count, 1);

        let history = db.result_history(SCAN).await.unwrap();
        assert_eq!(history.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn search_supports_wildcards_and_regexes() {
        let (db, _) = scan_with_chain().await;
        let hits = db
            .search(&SearchCriteria {
                value: Some("192.0.2.*".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = db
            .search(&SearchCriteria {
                value: Some("/^exa.+com$/".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scan_id, SCAN);

        assert!(matches!(
            db.search(&SearchCriteria {
                value: Some("/(/".into()),
                ..Default::default()
            })
            .await,
            Err(StoreError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn status_changes_stamp_times() {
        let (db, _) = scan_with_chain().await;
        let inst = db.scan_instance_set(SCAN, ScanStatus::Running).await.unwrap();
        assert!(inst.started.is_some() && inst.ended.is_none());
        assert!(
            !db.scan_instance_transition(SCAN, ScanStatus::Finished, ScanStatus::Aborted)
                .await
                .unwrap()
        );
        assert!(
            db.scan_instance_transition(SCAN, ScanStatus::Running, ScanStatus::AbortRequested)
                .await
                .unwrap()
        );
        let inst = db.scan_instance_set(SCAN, ScanStatus::Aborted).await.unwrap();
        assert!(inst.ended.is_some());
    }

    #[tokio::test]
    async fn logs_are_tailed_and_filtered() {
        let (db, _) = scan_with_chain().await;
        for i in 0..5 {
            db.scan_log(SCAN, "scanner", LogLevel::Info, format!("line {i}"))
                .await
                .unwrap();
        }
        db.scan_log(SCAN, "voipbl", LogLevel::Error, "fetch failed")
            .await
            .unwrap();
        let tail = db.scan_logs(SCAN, Some(2)).await.unwrap();
        assert_eq!(tail[0].message, "line 4");
        assert_eq!(tail[1].message, "fetch failed");
        let errors = db.scan_errors(SCAN, None).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, "voipbl");
    }
}

// src/core/modules/blocklist.rs

//! Reputation checks against published block lists.
//!
//! A list is downloaded once per cache period and shared by every scan
//! through the resource cache. Netblocks are checked by pulling every IP out
//! of the list and testing containment; IPs and domains are checked line by
//! line, either literally or with the list's pattern.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::core::error::{FetchError, ModuleError};
use crate::core::event::{Event, EventType, tag_url};
use crate::core::module::{
    ModuleContext, ModuleMeta, ModuleOptions, OptionSpec, ResultsCache, ScanModule, StopSignal, Watch,
};
use crate::core::target::host_domain;

const IP_PATTERN: &str = r"(\d+\.\d+\.\d+\.\d+)";

/// What kind of item a list can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Ip,
    Netblock,
    Domain,
}

/// Outcome of looking one item up in a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Listed,
    NotListed,
    /// The scan was stopped before the list was fully checked.
    Stopped,
}

/// One downloadable list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSource {
    pub title: &'static str,
    pub id: &'static str,
    pub url: &'static str,
    pub checks: &'static [ItemKind],
    /// Line pattern with `{0}` standing for the item; `None` means lines are
    /// compared literally.
    pub pattern: Option<&'static str>,
}

const VOIPBL: &[ListSource] = &[ListSource {
    title: "VoIPBL Publicly Accessible PBX List",
    id: "voipbl",
    url: "http://www.voipbl.org/update",
    checks: &[ItemKind::Ip, ItemKind::Netblock],
    pattern: Some(r"{0}/"),
}];

pub struct ListModule {
    meta: ModuleMeta,
    sources: &'static [ListSource],
    options: ModuleOptions,
    results: ResultsCache,
}

impl ListModule {
    pub fn new(meta: ModuleMeta, sources: &'static [ListSource]) -> Self {
        Self {
            meta,
            sources,
            options: ModuleOptions::default(),
            results: ResultsCache::default(),
        }
    }

    /// VoIPBL list of open PBX hosts.
    pub fn voipbl() -> Self {
        Self::new(
            ModuleMeta {
                name: "voipbl",
                summary: "Check if an IP or netblock is an open PBX according to VoIPBL.",
                use_cases: &["Investigate", "Passive"],
                categories: &["Reputation Systems"],
                flags: &[],
            },
            VOIPBL,
        )
    }

    fn checks(&self, kind: ItemKind) -> bool {
        self.sources.iter().any(|s| s.checks.contains(&kind))
    }

    /// Input kind and output type for an incoming event, or `None` when the
    /// options say to leave it alone.
    fn classify(&self, event_type: &EventType) -> Option<(ItemKind, EventType)> {
        let (kind, out, gate) = match event_type {
            EventType::IpAddress => (ItemKind::Ip, EventType::MaliciousIpaddr, None),
            EventType::AffiliateIpaddr => (
                ItemKind::Ip,
                EventType::MaliciousAffiliateIpaddr,
                Some("checkaffiliates"),
            ),
            EventType::NetblockOwner => (
                ItemKind::Netblock,
                EventType::MaliciousNetblock,
                Some("checknetblocks"),
            ),
            EventType::NetblockMember => (
                ItemKind::Netblock,
                EventType::MaliciousSubnet,
                Some("checksubnets"),
            ),
            EventType::InternetName => (ItemKind::Domain, EventType::MaliciousInternetName, None),
            EventType::AffiliateInternetName => (
                ItemKind::Domain,
                EventType::MaliciousAffiliateInternetName,
                Some("checkaffiliates"),
            ),
            EventType::CoHostedSite => (
                ItemKind::Domain,
                EventType::MaliciousCohost,
                Some("checkcohosts"),
            ),
            _ => return None,
        };
        if gate.is_some_and(|opt| !self.options.get_bool(opt)) {
            return None;
        }
        Some((kind, out))
    }

    async fn list_content(&self, ctx: &ModuleContext, source: &ListSource) -> Result<Arc<str>, FetchError> {
        let hours = u64::try_from(self.options.get_int("cacheperiod")).unwrap_or(0);
        let ttl = Duration::from_secs(hours * 3600);
        ctx.cache()
            .get_or_fetch(&format!("list_{}", source.id), ttl, || async move {
                let response = ctx.fetcher().fetch(source.url).await?.ensure_success()?;
                Ok::<String, FetchError>(response.body)
            })
            .await
    }
}

#[async_trait]
impl ScanModule for ListModule {
    fn meta(&self) -> ModuleMeta {
        self.meta.clone()
    }

    fn watched_events(&self) -> Watch {
        let mut types = Vec::new();
        if self.checks(ItemKind::Ip) {
            types.extend([EventType::IpAddress, EventType::AffiliateIpaddr]);
        }
        if self.checks(ItemKind::Netblock) {
            types.extend([EventType::NetblockOwner, EventType::NetblockMember]);
        }
        if self.checks(ItemKind::Domain) {
            types.extend([
                EventType::InternetName,
                EventType::AffiliateInternetName,
                EventType::CoHostedSite,
            ]);
        }
        Watch::Types(types)
    }

    fn produced_events(&self) -> Vec<EventType> {
        let mut types = Vec::new();
        if self.checks(ItemKind::Ip) {
            types.extend([EventType::MaliciousIpaddr, EventType::MaliciousAffiliateIpaddr]);
        }
        if self.checks(ItemKind::Netblock) {
            types.extend([EventType::MaliciousSubnet, EventType::MaliciousNetblock]);
        }
        if self.checks(ItemKind::Domain) {
            types.extend([
                EventType::MaliciousInternetName,
                EventType::MaliciousAffiliateInternetName,
                EventType::MaliciousCohost,
            ]);
        }
        types
    }

    fn options(&self) -> Vec<OptionSpec> {
        let mut options = vec![
            OptionSpec::new("checkaffiliates", true, "Apply checks to affiliates?"),
            OptionSpec::new("cacheperiod", 18_i64, "Hours to cache list data before re-fetching."),
        ];
        if self.checks(ItemKind::Netblock) {
            options.push(OptionSpec::new(
                "checknetblocks",
                true,
                "Report if any malicious IPs are found within owned netblocks?",
            ));
            options.push(OptionSpec::new(
                "checksubnets",
                true,
                "Check if any malicious IPs are found within the same subnet of the target?",
            ));
        }
        if self.checks(ItemKind::Domain) {
            options.push(OptionSpec::new("checkcohosts", true, "Apply checks to sites on the same host?"));
        }
        options
    }

    fn setup(&mut self, _ctx: &ModuleContext, options: ModuleOptions) -> Result<(), ModuleError> {
        self.options = options;
        self.results.clear();
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        if !self.results.first_time(&event.data) {
            debug!(module = ctx.module_name(), data = %event.data, "Already checked.");
            return Ok(());
        }
        let Some((kind, out)) = self.classify(&event.event_type) else {
            return Ok(());
        };

        for source in self.sources.iter().filter(|s| s.checks.contains(&kind)) {
            if ctx.check_for_stop() {
                return Ok(());
            }
            let content = match self.list_content(ctx, source).await {
                Ok(content) => content,
                Err(e) => {
                    ctx.error(format!("unable to fetch {}: {e}", source.url)).await;
                    continue;
                }
            };
            let item = event.data.clone();
            let base = match kind {
                ItemKind::Domain => host_domain(&item, &ctx.config().internet_tlds),
                _ => None,
            };
            let pattern = source.pattern;
            let stop = ctx.stop_signal().clone();
            // Lists run to hundreds of thousands of lines; keep them off the runtime.
            let lookup = tokio::task::spawn_blocking(move || match kind {
                ItemKind::Netblock => netblock_listed(&content, pattern, &item, &stop),
                ItemKind::Ip => ip_listed(&content, pattern, &item, &stop),
                ItemKind::Domain => domain_listed(&content, pattern, &item, base.as_deref(), &stop),
            })
            .await
            .map_err(|e| ModuleError::Other(format!("list check for {} failed: {e}", source.id)))??;

            match lookup {
                Lookup::Stopped => {
                    debug!(module = ctx.module_name(), list = source.id, "Stopped mid-list.");
                    return Ok(());
                }
                Lookup::Listed if !ctx.check_for_stop() => {
                    debug!(module = ctx.module_name(), data = %event.data, list = source.id, "Listed.");
                    let text = tag_url(&format!("{} [{}]", source.title, event.data), source.url);
                    ctx.emit(ctx.child(out.clone(), text, event).with_scores(100, 100, 100));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn line_regex(pattern: &str, item: &str) -> Result<Regex, ModuleError> {
    let source = format!("^{}", pattern.replace("{0}", item));
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| ModuleError::Parse {
            what: "list pattern".into(),
            reason: e.to_string(),
        })
}

fn list_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Tests candidate lines in order, polling `stop` before each one.
fn scan_lines(content: &str, stop: &StopSignal, mut hit: impl FnMut(&str) -> bool) -> Lookup {
    for line in list_lines(content) {
        if stop.is_stopped() {
            return Lookup::Stopped;
        }
        if hit(line) {
            return Lookup::Listed;
        }
    }
    Lookup::NotListed
}

/// Whether any IP in the list lies within `netblock`.
pub fn netblock_listed(
    content: &str,
    pattern: Option<&str>,
    netblock: &str,
    stop: &StopSignal,
) -> Result<Lookup, ModuleError> {
    let Ok(net) = IpNet::from_str(netblock.trim()) else {
        return Ok(Lookup::NotListed);
    };
    let extract = pattern
        .map(|p| line_regex(p, IP_PATTERN))
        .transpose()?;
    Ok(scan_lines(content, stop, |line| {
        let ip = match &extract {
            Some(re) => re.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()),
            None => Some(line),
        };
        ip.filter(|ip| ip.len() >= 7)
            .and_then(|ip| IpAddr::from_str(ip).ok())
            .is_some_and(|ip| net.contains(&ip))
    }))
}

/// Whether `ip` is listed, either on a line of its own (per the pattern) or
/// inside a CIDR range on the list.
pub fn ip_listed(
    content: &str,
    pattern: Option<&str>,
    ip: &str,
    stop: &StopSignal,
) -> Result<Lookup, ModuleError> {
    let addr = IpAddr::from_str(ip.trim()).ok();
    let exact = pattern
        .map(|p| line_regex(p, &regex::escape(ip)))
        .transpose()?;
    Ok(scan_lines(content, stop, |line| {
        let named = match &exact {
            Some(re) => re.is_match(line),
            None => line == ip,
        };
        named
            || addr.is_some_and(|a| {
                line.split_whitespace()
                    .next()
                    .and_then(|cidr| IpNet::from_str(cidr).ok())
                    .is_some_and(|net| net.contains(&a))
            })
    }))
}

/// Whether the host or its base domain is listed.
pub fn domain_listed(
    content: &str,
    pattern: Option<&str>,
    host: &str,
    base: Option<&str>,
    stop: &StopSignal,
) -> Result<Lookup, ModuleError> {
    let candidates: Vec<&str> = std::iter::once(host).chain(base).collect();
    match pattern {
        None => Ok(scan_lines(content, stop, |line| {
            candidates.iter().any(|c| line.eq_ignore_ascii_case(c))
        })),
        Some(p) => {
            let res = candidates
                .iter()
                .map(|c| line_regex(p, &regex::escape(c)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(scan_lines(content, stop, |line| res.iter().any(|re| re.is_match(line))))
        }
    }
}

// src/core/modules/dns.rs

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::{debug, warn};

use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType};
use crate::core::module::{ModuleContext, ModuleMeta, ModuleOptions, ResultsCache, ScanModule, Watch};

/// Resolves host names belonging to the target into addresses, and reads the
/// TXT records of the target itself.
#[derive(Default)]
pub struct DnsResolve {
    resolver: Option<TokioAsyncResolver>,
    results: ResultsCache,
}

/// Event type for a resolved address.
fn address_event(ip: &IpAddr) -> EventType {
    match ip {
        IpAddr::V4(_) => EventType::IpAddress,
        IpAddr::V6(_) => EventType::Ipv6Address,
    }
}

/// Events for a set of TXT records. SPF policies are reported twice, once as
/// plain text and once as SPF.
pub fn txt_events(records: &[String]) -> Vec<(EventType, String)> {
    let mut events = Vec::new();
    for record in records {
        events.push((EventType::DnsText, record.clone()));
        if record.trim_start().to_ascii_lowercase().starts_with("v=spf1") {
            events.push((EventType::DnsSpf, record.clone()));
        }
    }
    events
}

#[async_trait]
impl ScanModule for DnsResolve {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: "dnsresolve",
            summary: "Resolves host names of the target to IP addresses and reads its TXT records.",
            use_cases: &["Footprint", "Investigate", "Passive"],
            categories: &["DNS"],
            flags: &[],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::Types(vec![EventType::InternetName])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![
            EventType::IpAddress,
            EventType::Ipv6Address,
            EventType::DnsText,
            EventType::DnsSpf,
        ]
    }

    fn setup(&mut self, _ctx: &ModuleContext, _options: ModuleOptions) -> Result<(), ModuleError> {
        self.resolver = None;
        self.results.clear();
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        let host = event.data.trim_end_matches('.').to_lowercase();
        if !ctx.target().matches(&host) {
            debug!(host = %host, "Not part of the target, skipping.");
            return Ok(());
        }
        if !self.results.first_time(&host) {
            return Ok(());
        }
        let resolver = self
            .resolver
            .get_or_insert_with(|| TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()));

        match resolver.lookup_ip(host.as_str()).await {
            Ok(lookup) => {
                for ip in lookup.iter() {
                    if ctx.check_for_stop() {
                        return Ok(());
                    }
                    ctx.emit(ctx.child(address_event(&ip), ip.to_string(), event));
                }
            }
            Err(e) => debug!(host = %host, error = %e, "Host did not resolve."),
        }

        let root = host.strip_prefix("www.").unwrap_or(&host);
        if root != ctx.target().value {
            return Ok(());
        }
        match resolver.txt_lookup(root).await {
            Ok(lookup) => {
                let records: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
                for (event_type, data) in txt_events(&records) {
                    ctx.emit(ctx.child(event_type, data, event));
                }
            }
            Err(e) => warn!(host = root, error = %e, "TXT lookup failed."),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spf_records_are_reported_twice() {
        let events = txt_events(&[
            "v=spf1 include:_spf.example.com ~all".to_string(),
            "google-site-verification=abc".to_string(),
        ]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].0, EventType::DnsSpf);
        assert_eq!(events[2], (EventType::DnsText, "google-site-verification=abc".to_string()));
    }

    #[test]
    fn address_family_picks_the_event_type() {
        assert_eq!(address_event(&"192.0.2.1".parse().unwrap()), EventType::IpAddress);
        assert_eq!(address_event(&"2001:db8::1".parse().unwrap()), EventType::Ipv6Address);
    }
}

// src/core/catalogue.rs

//! Static catalogue of the event kinds the engine knows about.
//!
//! Each entry gives the human-readable description shown in summaries and the
//! category used to group kinds in the interface. Kinds that only exist at
//! runtime (`EventType::Custom`) fall back to a generic entry.

use crate::core::event::EventType;
use serde::Serialize;
use strum::Display;

/// High-level grouping of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    /// Something that exists in its own right: an IP, a host, a person.
    Entity,
    /// A statement about an entity, e.g. that an IP is listed as malicious.
    Descriptor,
    /// Raw payloads kept for reference.
    Data,
    /// A part of an entity, such as a URL on a host.
    Subentity,
    /// Engine bookkeeping.
    Internal,
}

/// Description of one event kind.
#[derive(Debug, Clone, Serialize)]
pub struct EventTypeDetail {
    pub event_type: EventType,
    pub description: &'static str,
    pub category: EventCategory,
    /// Raw kinds carry unparsed payloads and are hidden from graph views.
    pub raw: bool,
}

struct Entry(&'static str, &'static str, EventCategory, bool);

static ENTRIES: &[Entry] = &[
    Entry("ROOT", "Internal Scan Root", EventCategory::Internal, false),
    Entry("IP_ADDRESS", "IP Address", EventCategory::Entity, false),
    Entry("IPV6_ADDRESS", "IPv6 Address", EventCategory::Entity, false),
    Entry("AFFILIATE_IPADDR", "Affiliate - IP Address", EventCategory::Entity, false),
    Entry("NETBLOCK_OWNER", "Netblock Ownership", EventCategory::Entity, false),
    Entry("NETBLOCKV6_OWNER", "Netblock IPv6 Ownership", EventCategory::Entity, false),
    Entry("NETBLOCK_MEMBER", "Netblock Membership", EventCategory::Entity, false),
    Entry("INTERNET_NAME", "Internet Name", EventCategory::Entity, false),
    Entry("DOMAIN_NAME", "Domain Name", EventCategory::Entity, false),
    Entry("AFFILIATE_INTERNET_NAME", "Affiliate - Internet Name", EventCategory::Entity, false),
    Entry("CO_HOSTED_SITE", "Co-Hosted Site", EventCategory::Entity, false),
    Entry("EMAILADDR", "Email Address", EventCategory::Entity, false),
    Entry("PHONE_NUMBER", "Phone Number", EventCategory::Entity, false),
    Entry("HUMAN_NAME", "Human Name", EventCategory::Entity, false),
    Entry("USERNAME", "Username", EventCategory::Entity, false),
    Entry("BGP_AS_OWNER", "BGP AS Ownership", EventCategory::Entity, false),
    Entry("BGP_AS_MEMBER", "BGP AS Membership", EventCategory::Entity, false),
    Entry("BITCOIN_ADDRESS", "Bitcoin Address", EventCategory::Entity, false),
    Entry("MALICIOUS_IPADDR", "Malicious IP Address", EventCategory::Descriptor, false),
    Entry("MALICIOUS_AFFILIATE_IPADDR", "Malicious Affiliate IP Address", EventCategory::Descriptor, false),
    Entry("MALICIOUS_SUBNET", "Malicious IP on Same Subnet", EventCategory::Descriptor, false),
    Entry("MALICIOUS_NETBLOCK", "Owned Netblock with Malicious IP", EventCategory::Descriptor, false),
    Entry("MALICIOUS_INTERNET_NAME", "Malicious Internet Name", EventCategory::Descriptor, false),
    Entry("MALICIOUS_AFFILIATE_INTERNET_NAME", "Malicious Affiliate", EventCategory::Descriptor, false),
    Entry("MALICIOUS_COHOST", "Malicious Co-Hosted Site", EventCategory::Descriptor, false),
    Entry("MALICIOUS_ASN", "Malicious AS", EventCategory::Descriptor, false),
    Entry("MALICIOUS_BITCOIN_ADDRESS", "Malicious Bitcoin Address", EventCategory::Descriptor, false),
    Entry("RAW_RIR_DATA", "Raw Data from RIRs/APIs", EventCategory::Data, true),
    Entry("DNS_TEXT", "DNS TXT Record", EventCategory::Data, false),
    Entry("DNS_SPF", "DNS SPF Record", EventCategory::Data, false),
    Entry("SSL_CERTIFICATE_ISSUED", "SSL Certificate - Issued to", EventCategory::Entity, false),
    Entry("SSL_CERTIFICATE_ISSUER", "SSL Certificate - Issued by", EventCategory::Entity, false),
    Entry("SSL_CERTIFICATE_EXPIRED", "SSL Certificate Expired", EventCategory::Descriptor, false),
    Entry("SSL_CERTIFICATE_EXPIRING", "SSL Certificate Expiring", EventCategory::Descriptor, false),
    Entry("WEBSERVER_HTTPHEADERS", "HTTP Headers", EventCategory::Data, true),
    Entry("WEBSERVER_BANNER", "Web Server", EventCategory::Data, false),
    Entry("WEBSERVER_TECHNOLOGY", "Web Technology", EventCategory::Descriptor, false),
    Entry("LINKED_URL_INTERNAL", "Linked URL - Internal", EventCategory::Subentity, false),
    Entry("LINKED_URL_EXTERNAL", "Linked URL - External", EventCategory::Entity, false),
];

/// Returns the catalogue entry for every built-in kind.
pub fn all() -> Vec<EventTypeDetail> {
    ENTRIES.iter().map(to_detail).collect()
}

/// Looks up the detail for a kind, synthesising one for custom kinds.
pub fn detail(event_type: &EventType) -> EventTypeDetail {
    ENTRIES
        .iter()
        .find(|e| e.0 == event_type.as_str())
        .map(to_detail)
        .unwrap_or_else(|| EventTypeDetail {
            event_type: event_type.clone(),
            description: "Custom Event",
            category: EventCategory::Data,
            raw: false,
        })
}

pub fn describe(event_type: &EventType) -> &'static str {
    ENTRIES
        .iter()
        .find(|e| e.0 == event_type.as_str())
        .map(|e| e.1)
        .unwrap_or("Custom Event")
}

fn to_detail(entry: &Entry) -> EventTypeDetail {
    EventTypeDetail {
        event_type: EventType::from(entry.0.to_string()),
        description: entry.1,
        category: entry.2,
        raw: entry.3,
    }
}

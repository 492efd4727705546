// src/core/event.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash reserved for the root event of every scan.
pub const ROOT_HASH: &str = "ROOT";

/// Generates the `EventType` enum together with its wire names.
///
/// Known kinds are listed explicitly; anything else parses into
/// `EventType::Custom` so third-party modules can introduce new kinds.
macro_rules! event_types {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// The kind of information an event carries.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum EventType {
            $($variant,)+
            Custom(String),
        }

        impl EventType {
            /// Every built-in kind, in declaration order.
            pub const KNOWN: &'static [EventType] = &[$(EventType::$variant,)+];

            pub fn as_str(&self) -> &str {
                match self {
                    $(EventType::$variant => $name,)+
                    EventType::Custom(name) => name.as_str(),
                }
            }
        }

        impl From<String> for EventType {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($name => EventType::$variant,)+
                    _ => EventType::Custom(value),
                }
            }
        }
    };
}

event_types! {
    Root => "ROOT",
    IpAddress => "IP_ADDRESS",
    Ipv6Address => "IPV6_ADDRESS",
    AffiliateIpaddr => "AFFILIATE_IPADDR",
    NetblockOwner => "NETBLOCK_OWNER",
    Netblockv6Owner => "NETBLOCKV6_OWNER",
    NetblockMember => "NETBLOCK_MEMBER",
    InternetName => "INTERNET_NAME",
    DomainName => "DOMAIN_NAME",
    AffiliateInternetName => "AFFILIATE_INTERNET_NAME",
    CoHostedSite => "CO_HOSTED_SITE",
    EmailAddr => "EMAILADDR",
    PhoneNumber => "PHONE_NUMBER",
    HumanName => "HUMAN_NAME",
    Username => "USERNAME",
    BgpAsOwner => "BGP_AS_OWNER",
    BgpAsMember => "BGP_AS_MEMBER",
    BitcoinAddress => "BITCOIN_ADDRESS",
    MaliciousIpaddr => "MALICIOUS_IPADDR",
    MaliciousAffiliateIpaddr => "MALICIOUS_AFFILIATE_IPADDR",
    MaliciousSubnet => "MALICIOUS_SUBNET",
    MaliciousNetblock => "MALICIOUS_NETBLOCK",
    MaliciousInternetName => "MALICIOUS_INTERNET_NAME",
    MaliciousAffiliateInternetName => "MALICIOUS_AFFILIATE_INTERNET_NAME",
    MaliciousCohost => "MALICIOUS_COHOST",
    MaliciousAsn => "MALICIOUS_ASN",
    MaliciousBitcoinAddress => "MALICIOUS_BITCOIN_ADDRESS",
    RawRirData => "RAW_RIR_DATA",
    DnsText => "DNS_TEXT",
    DnsSpf => "DNS_SPF",
    SslCertificateIssued => "SSL_CERTIFICATE_ISSUED",
    SslCertificateIssuer => "SSL_CERTIFICATE_ISSUER",
    SslCertificateExpired => "SSL_CERTIFICATE_EXPIRED",
    SslCertificateExpiring => "SSL_CERTIFICATE_EXPIRING",
    WebserverHttpheaders => "WEBSERVER_HTTPHEADERS",
    WebserverBanner => "WEBSERVER_BANNER",
    WebserverTechnology => "WEBSERVER_TECHNOLOGY",
    LinkedUrlInternal => "LINKED_URL_INTERNAL",
    LinkedUrlExternal => "LINKED_URL_EXTERNAL",
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s.trim().to_uppercase()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered fact within a scan.
///
/// Events are immutable once created, apart from the false-positive flag which
/// is only ever changed through the store. Every event except the root points
/// at the event that caused it through `source_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub hash: String,
    pub event_type: EventType,
    pub data: String,
    pub module: String,
    pub source_hash: Option<String>,
    pub generated: DateTime<Utc>,
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
    #[serde(default)]
    pub false_positive: bool,
}

impl Event {
    /// Creates the root event carrying the scan target.
    pub fn root(target: &str) -> Self {
        Self {
            hash: ROOT_HASH.to_string(),
            event_type: EventType::Root,
            data: target.to_string(),
            module: String::new(),
            source_hash: None,
            generated: Utc::now(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            false_positive: false,
        }
    }

    /// Creates an event produced by `module` in response to `source`.
    ///
    /// The generation time never precedes the parent's, so parent/child
    /// timestamps stay ordered even if the clock moves backwards.
    pub fn new(
        event_type: EventType,
        data: impl Into<String>,
        module: impl Into<String>,
        source: &Event,
    ) -> Self {
        let data = data.into();
        let module = module.into();
        let hash = fingerprint(&event_type, &data, &module);
        Self {
            hash,
            event_type,
            data,
            module,
            source_hash: Some(source.hash.clone()),
            generated: Utc::now().max(source.generated),
            confidence: 100,
            visibility: 100,
            risk: 0,
            false_positive: false,
        }
    }

    pub fn with_scores(mut self, confidence: u8, visibility: u8, risk: u8) -> Self {
        self.confidence = confidence.min(100);
        self.visibility = visibility.min(100);
        self.risk = risk.min(100);
        self
    }

    pub fn is_root(&self) -> bool {
        self.event_type == EventType::Root
    }
}

/// Content fingerprint used both as the event identifier and for deduplication.
pub fn fingerprint(event_type: &EventType, data: &str, module: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(data.as_bytes());
    hasher.update(b"|");
    hasher.update(module.as_bytes());
    format!("{:x}", hasher.finalize())
}

static RE_TAGGED_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"<URL>(.*?)</URL>").unwrap());

/// Appends a source reference to a free-text note, e.g. `"List [1.2.3.4]\n<URL>…</URL>"`.
pub fn tag_url(text: &str, url: &str) -> String {
    format!("{text}\n<URL>{url}</URL>")
}

/// Extracts the first source reference embedded with [`tag_url`].
pub fn extract_tagged_url(data: &str) -> Option<&str> {
    RE_TAGGED_URL
        .captures(data)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_custom_types() {
        assert_eq!("IP_ADDRESS".parse::<EventType>().unwrap(), EventType::IpAddress);
        assert_eq!("malicious_ipaddr".parse::<EventType>().unwrap(), EventType::MaliciousIpaddr);
        assert_eq!(
            "VENDOR_THING".parse::<EventType>().unwrap(),
            EventType::Custom("VENDOR_THING".to_string())
        );
        assert_eq!(EventType::Custom("X_Y".into()).to_string(), "X_Y");
    }

    #[test]
    fn child_hash_depends_on_type_data_and_module() {
        let root = Event::root("example.com");
        let a = Event::new(EventType::InternetName, "example.com", "dns", &root);
        let b = Event::new(EventType::InternetName, "example.com", "dns", &root);
        let c = Event::new(EventType::InternetName, "example.com", "web", &root);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.source_hash.as_deref(), Some(ROOT_HASH));
        assert!(a.generated >= root.generated);
    }

    #[test]
    fn tagged_url_roundtrip() {
        let note = tag_url("VoIPBL [10.0.0.1]", "http://www.voipbl.org/update");
        assert_eq!(extract_tagged_url(&note), Some("http://www.voipbl.org/update"));
        assert_eq!(extract_tagged_url("no reference"), None);
    }

    #[test]
    fn event_type_serializes_as_string() {
        let json = serde_json::to_string(&EventType::DnsSpf).unwrap();
        assert_eq!(json, "\"DNS_SPF\"");
        let back: EventType = serde_json::from_str("\"RAW_RIR_DATA\"").unwrap();
        assert_eq!(back, EventType::RawRirData);
    }
}

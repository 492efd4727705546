// src/core/target.rs

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::core::error::TargetError;
use crate::core::event::EventType;

/// The kinds of seed value a scan can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    IpAddress,
    Ipv6Address,
    NetblockOwner,
    Netblockv6Owner,
    InternetName,
    EmailAddr,
    PhoneNumber,
    HumanName,
    Username,
    BgpAsOwner,
    BitcoinAddress,
}

impl TargetType {
    /// The event kind the target is seeded as.
    pub fn event_type(self) -> EventType {
        match self {
            TargetType::IpAddress => EventType::IpAddress,
            TargetType::Ipv6Address => EventType::Ipv6Address,
            TargetType::NetblockOwner => EventType::NetblockOwner,
            TargetType::Netblockv6Owner => EventType::Netblockv6Owner,
            TargetType::InternetName => EventType::InternetName,
            TargetType::EmailAddr => EventType::EmailAddr,
            TargetType::PhoneNumber => EventType::PhoneNumber,
            TargetType::HumanName => EventType::HumanName,
            TargetType::Username => EventType::Username,
            TargetType::BgpAsOwner => EventType::BgpAsOwner,
            TargetType::BitcoinAddress => EventType::BitcoinAddress,
        }
    }

    /// Whether the target value keeps its original casing.
    fn preserves_case(self) -> bool {
        matches!(
            self,
            TargetType::HumanName | TargetType::Username | TargetType::BitcoinAddress
        )
    }
}

static RE_IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").unwrap());
static RE_NETBLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+/\d+$").unwrap());
static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap());
static RE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[0-9]+$").unwrap());
static RE_HUMAN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^".+\s+.+"$"#).unwrap());
static RE_USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^".+"$"#).unwrap());
static RE_ASN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static RE_IPV6: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[0-9a-f:]+$").unwrap());
static RE_NETBLOCKV6: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[0-9a-f:]+/[0-9]+$").unwrap());
static RE_INTERNET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(([a-z0-9]|[a-z0-9][a-z0-9\-]*[a-z0-9])\.)+[a-z0-9\-]*[a-z][a-z0-9\-]*$").unwrap()
});
static RE_BITCOIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(bc(0([ac-hj-np-z02-9]{39}|[ac-hj-np-z02-9]{59})|1[ac-hj-np-z02-9]{8,87})|[13][a-km-zA-HJ-NP-Z1-9]{25,35})$").unwrap()
});

/// A classification rule: the pattern plus an optional stricter validator.
struct Rule {
    pattern: &'static Lazy<Regex>,
    validate: Option<fn(&str) -> bool>,
    target_type: TargetType,
}

fn is_ipv4(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

fn is_ipv4_net(s: &str) -> bool {
    s.parse::<Ipv4Net>().is_ok()
}

fn is_ipv6(s: &str) -> bool {
    s.parse::<Ipv6Addr>().is_ok()
}

fn is_ipv6_net(s: &str) -> bool {
    s.parse::<Ipv6Net>().is_ok()
}

/// Ordered so that the narrowest shapes win; quoted values are always names.
static RULES: &[Rule] = &[
    Rule { pattern: &RE_IPV4, validate: Some(is_ipv4), target_type: TargetType::IpAddress },
    Rule { pattern: &RE_NETBLOCK, validate: Some(is_ipv4_net), target_type: TargetType::NetblockOwner },
    Rule { pattern: &RE_EMAIL, validate: None, target_type: TargetType::EmailAddr },
    Rule { pattern: &RE_PHONE, validate: None, target_type: TargetType::PhoneNumber },
    Rule { pattern: &RE_HUMAN_NAME, validate: None, target_type: TargetType::HumanName },
    Rule { pattern: &RE_USERNAME, validate: None, target_type: TargetType::Username },
    Rule { pattern: &RE_ASN, validate: None, target_type: TargetType::BgpAsOwner },
    Rule { pattern: &RE_IPV6, validate: Some(is_ipv6), target_type: TargetType::Ipv6Address },
    Rule { pattern: &RE_NETBLOCKV6, validate: Some(is_ipv6_net), target_type: TargetType::Netblockv6Owner },
    Rule { pattern: &RE_INTERNET_NAME, validate: None, target_type: TargetType::InternetName },
    Rule { pattern: &RE_BITCOIN, validate: None, target_type: TargetType::BitcoinAddress },
];

/// Classifies a free-text target.
///
/// Returns `None` when the value does not look like anything a scan can start
/// from. A dotted quad with out-of-range octets is rejected rather than being
/// mistaken for a host name.
pub fn target_type_from_string(value: &str) -> Option<TargetType> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for rule in RULES {
        if !rule.pattern.is_match(value) {
            continue;
        }
        match rule.validate {
            Some(valid) if !valid(value) => {
                if rule.target_type == TargetType::IpAddress {
                    return None;
                }
            }
            _ => return Some(rule.target_type),
        }
    }
    None
}

/// The value a scan is run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub value: String,
    pub target_type: TargetType,
}

impl Target {
    /// Classifies and normalises a raw target string.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TargetError::Empty);
        }
        let target_type =
            target_type_from_string(raw).ok_or_else(|| TargetError::Unrecognised(raw.to_string()))?;
        let value = if target_type.preserves_case() {
            raw.replace('"', "")
        } else {
            raw.to_lowercase()
        };
        Ok(Self { value, target_type })
    }

    /// Whether a host name belongs to the target (same name or a sub-domain of it).
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        match self.target_type {
            TargetType::InternetName => {
                host == self.value || host.ends_with(&format!(".{}", self.value))
            }
            TargetType::EmailAddr => self
                .value
                .split_once('@')
                .map(|(_, domain)| host == domain || host.ends_with(&format!(".{domain}")))
                .unwrap_or(false),
            _ => host == self.value,
        }
    }
}

/// Returns the registrable base domain of `host` under the given public suffixes.
///
/// `www.mail.example.co.uk` with `co.uk` in `tlds` yields `example.co.uk`.
/// Hosts not under any known suffix yield `None`.
pub fn host_domain(host: &str, tlds: &[String]) -> Option<String> {
    let host = host.trim_end_matches('.').to_lowercase();
    let suffixes: Vec<String> = tlds
        .iter()
        .map(|t| t.trim_start_matches('.').to_lowercase())
        .collect();
    if suffixes.contains(&host) {
        return None;
    }
    let suffix = suffixes
        .into_iter()
        .filter(|t| host.ends_with(&format!(".{t}")))
        .max_by_key(|t| t.len())?;
    let prefix = &host[..host.len() - suffix.len() - 1];
    let label = prefix.rsplit('.').next().filter(|l| !l.is_empty())?;
    Some(format!("{label}.{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_target_shapes() {
        assert_eq!(target_type_from_string("192.0.2.1"), Some(TargetType::IpAddress));
        assert_eq!(target_type_from_string("192.0.2.0/24"), Some(TargetType::NetblockOwner));
        assert_eq!(target_type_from_string("bob@example.com"), Some(TargetType::EmailAddr));
        assert_eq!(target_type_from_string("+441234567890"), Some(TargetType::PhoneNumber));
        assert_eq!(target_type_from_string("\"John Smith\""), Some(TargetType::HumanName));
        assert_eq!(target_type_from_string("\"jsmith\""), Some(TargetType::Username));
        assert_eq!(target_type_from_string("15169"), Some(TargetType::BgpAsOwner));
        assert_eq!(target_type_from_string("2001:db8::1"), Some(TargetType::Ipv6Address));
        assert_eq!(target_type_from_string("2001:db8::/32"), Some(TargetType::Netblockv6Owner));
        assert_eq!(target_type_from_string("www.Example.com"), Some(TargetType::InternetName));
        assert_eq!(
            target_type_from_string("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"),
            Some(TargetType::BitcoinAddress)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(target_type_from_string(""), None);
        assert_eq!(target_type_from_string("not a target"), None);
        assert_eq!(target_type_from_string("999.1.1.1"), None);
        assert!(matches!(Target::parse("   "), Err(TargetError::Empty)));
        assert!(matches!(Target::parse("???"), Err(TargetError::Unrecognised(_))));
    }

    #[test]
    fn quoted_names_are_forced_to_name_category() {
        let t = Target::parse("\"example.com\"").unwrap();
        assert_eq!(t.target_type, TargetType::Username);
        assert_eq!(t.value, "example.com");
        let t = Target::parse("\"Jane Q Public\"").unwrap();
        assert_eq!(t.target_type, TargetType::HumanName);
        assert_eq!(t.value, "Jane Q Public");
    }

    #[test]
    fn hosts_are_lowercased_and_matched_with_subdomains() {
        let t = Target::parse("Example.COM").unwrap();
        assert_eq!(t.value, "example.com");
        assert!(t.matches("www.example.com"));
        assert!(t.matches("EXAMPLE.com."));
        assert!(!t.matches("notexample.com"));
    }

    #[test]
    fn base_domain_uses_longest_suffix() {
        let tlds = vec!["uk".to_string(), "co.uk".to_string(), "com".to_string()];
        assert_eq!(host_domain("www.mail.example.co.uk", &tlds).as_deref(), Some("example.co.uk"));
        assert_eq!(host_domain("a.b.example.com", &tlds).as_deref(), Some("example.com"));
        assert_eq!(host_domain("example.org", &tlds), None);
        assert_eq!(host_domain("co.uk", &tlds), None);
    }
}

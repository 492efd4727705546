// src/core/modules/webcontent.rs

//! Fetches the front page of each host of the target and reports what the
//! web server says about itself: response headers, the server banner, the
//! technologies it gives away, and the links on the page.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType};
use crate::core::fetch::FetchResponse;
use crate::core::module::{
    ModuleContext, ModuleMeta, ModuleOptions, OptionSpec, ResultsCache, ScanModule, Watch,
};
use crate::core::target::Target;

/// Where a technology leaves its mark.
enum Probe {
    Header(&'static str),
    Cookie,
    Generator,
    Body,
    ScriptSrc,
    LinkHref,
}

struct Signature {
    name: &'static str,
    probe: Probe,
    pattern: &'static Lazy<Regex>,
}

macro_rules! re {
    ($name:ident, $pat:literal) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pat).unwrap());
    };
}

re!(NGINX, r"(?i)nginx(?:/([\d.]+))?");
re!(APACHE, r"Apache(?:/([\d.]+))?");
re!(CLOUDFLARE, r"(?i)cloudflare");
re!(LITESPEED, r"LiteSpeed");
re!(IIS, r"Microsoft-IIS(?:/([\d.]+))?");
re!(PHP, r"PHP(?:/([\d.]+))?");
re!(PHPSESSID, r"PHPSESSID");
re!(ASPNET, r"ASP\.NET");
re!(JSESSIONID, r"JSESSIONID");
re!(DJANGO, r"csrftoken");
re!(RAILS, r"_rails_session");
re!(WORDPRESS, r"WordPress ?([\d.]+)?");
re!(WP_PATHS, r"/wp-content/|/wp-includes/");
re!(JOOMLA, r"Joomla!");
re!(DRUPAL, r"Drupal ?([\d.]+)?");
re!(NEXTJS, r"/_next/static/");
re!(NUXT, r"__NUXT__");
re!(ANGULAR, r#"ng-version="([\d.]+)""#);
re!(REACT, r"react-dom|data-reactroot");
re!(JQUERY, r"jquery[.-]?([\d.]+\d)?(?:\.min)?\.js");
re!(BOOTSTRAP, r"bootstrap(?:\.min)?\.css");
re!(GOOGLE_ANALYTICS, r"google-analytics\.com/|googletagmanager\.com/");

static SIGNATURES: &[Signature] = &[
    Signature { name: "Nginx", probe: Probe::Header("server"), pattern: &NGINX },
    Signature { name: "Apache", probe: Probe::Header("server"), pattern: &APACHE },
    Signature { name: "Cloudflare", probe: Probe::Header("server"), pattern: &CLOUDFLARE },
    Signature { name: "LiteSpeed", probe: Probe::Header("server"), pattern: &LITESPEED },
    Signature { name: "IIS", probe: Probe::Header("server"), pattern: &IIS },
    Signature { name: "PHP", probe: Probe::Header("x-powered-by"), pattern: &PHP },
    Signature { name: "PHP", probe: Probe::Cookie, pattern: &PHPSESSID },
    Signature { name: "ASP.NET", probe: Probe::Header("x-powered-by"), pattern: &ASPNET },
    Signature { name: "Java", probe: Probe::Cookie, pattern: &JSESSIONID },
    Signature { name: "Django", probe: Probe::Cookie, pattern: &DJANGO },
    Signature { name: "Ruby on Rails", probe: Probe::Cookie, pattern: &RAILS },
    Signature { name: "WordPress", probe: Probe::Generator, pattern: &WORDPRESS },
    Signature { name: "WordPress", probe: Probe::Body, pattern: &WP_PATHS },
    Signature { name: "Joomla", probe: Probe::Generator, pattern: &JOOMLA },
    Signature { name: "Drupal", probe: Probe::Generator, pattern: &DRUPAL },
    Signature { name: "Next.js", probe: Probe::ScriptSrc, pattern: &NEXTJS },
    Signature { name: "Nuxt.js", probe: Probe::Body, pattern: &NUXT },
    Signature { name: "Angular", probe: Probe::Body, pattern: &ANGULAR },
    Signature { name: "React", probe: Probe::Body, pattern: &REACT },
    Signature { name: "jQuery", probe: Probe::ScriptSrc, pattern: &JQUERY },
    Signature { name: "Bootstrap", probe: Probe::LinkHref, pattern: &BOOTSTRAP },
    Signature { name: "Google Analytics", probe: Probe::ScriptSrc, pattern: &GOOGLE_ANALYTICS },
];

/// Everything read from one page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageAnalysis {
    /// Response headers as a JSON object.
    pub headers: String,
    pub banner: Option<String>,
    /// `"Name"` or `"Name Version"`, sorted.
    pub technologies: Vec<String>,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
}

/// `Some(version)` on a match, where the version is `None` if the pattern
/// matched without capturing one.
fn probe_text(text: &str, re: &Regex) -> Option<Option<String>> {
    re.captures(text).map(|caps| {
        caps.get(1)
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn probe_attr(doc: &Html, selector: &str, attr: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .find_map(|value| probe_text(value, re))
}

fn technologies(response: &FetchResponse, doc: &Html) -> Vec<String> {
    let cookies = response
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
        .map(|(_, v)| v.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let mut found: BTreeMap<&str, Option<String>> = BTreeMap::new();
    for sig in SIGNATURES {
        let hit = match sig.probe {
            Probe::Header(name) => response.header(name).and_then(|v| probe_text(v, sig.pattern)),
            Probe::Cookie => probe_text(&cookies, sig.pattern),
            Probe::Generator => probe_attr(doc, "meta[name='generator']", "content", sig.pattern),
            Probe::Body => probe_text(&response.body, sig.pattern),
            Probe::ScriptSrc => probe_attr(doc, "script[src]", "src", sig.pattern),
            Probe::LinkHref => probe_attr(doc, "link[href]", "href", sig.pattern),
        };
        if let Some(version) = hit {
            let entry = found.entry(sig.name).or_default();
            if entry.is_none() {
                *entry = version;
            }
        }
    }
    found
        .into_iter()
        .map(|(name, version)| match version {
            Some(v) => format!("{name} {v}"),
            None => name.to_string(),
        })
        .collect()
}

/// Absolute http(s) links on the page, split by whether they stay within the
/// target.
fn links(base: &Url, doc: &Html, target: &Target) -> (Vec<String>, Vec<String>) {
    let mut internal = BTreeSet::new();
    let mut external = BTreeSet::new();
    let Ok(selector) = Selector::parse("a[href]") else {
        return (Vec::new(), Vec::new());
    };
    for href in doc.select(&selector).filter_map(|el| el.value().attr("href")) {
        let Ok(mut url) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);
        let host = url.host_str().unwrap_or_default().to_string();
        if target.matches(&host) {
            internal.insert(url.to_string());
        } else {
            external.insert(url.to_string());
        }
    }
    (internal.into_iter().collect(), external.into_iter().collect())
}

pub fn analyze_page(response: &FetchResponse, target: &Target) -> PageAnalysis {
    let doc = Html::parse_document(&response.body);
    let headers: serde_json::Map<String, serde_json::Value> = response
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), serde_json::Value::String(v.clone())))
        .collect();
    let (internal_links, external_links) = match Url::parse(&response.url) {
        Ok(base) => links(&base, &doc, target),
        Err(_) => (Vec::new(), Vec::new()),
    };
    PageAnalysis {
        headers: serde_json::Value::Object(headers).to_string(),
        banner: response.header("server").map(str::to_string),
        technologies: technologies(response, &doc),
        internal_links,
        external_links,
    }
}

#[derive(Default)]
pub struct WebContent {
    report_links: bool,
    results: ResultsCache,
}

#[async_trait]
impl ScanModule for WebContent {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: "webcontent",
            summary: "Fetch the front page of target hosts and identify the web server, technologies and links.",
            use_cases: &["Footprint", "Investigate"],
            categories: &["Crawling and Scanning"],
            flags: &[],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::Types(vec![EventType::InternetName])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![
            EventType::WebserverHttpheaders,
            EventType::WebserverBanner,
            EventType::WebserverTechnology,
            EventType::LinkedUrlInternal,
            EventType::LinkedUrlExternal,
        ]
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new("report_links", true, "Report links found on the page?")]
    }

    fn setup(&mut self, _ctx: &ModuleContext, options: ModuleOptions) -> Result<(), ModuleError> {
        self.report_links = options.get_bool("report_links");
        self.results.clear();
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        let host = event.data.to_lowercase();
        if !ctx.target().matches(&host) || !self.results.first_time(&host) {
            return Ok(());
        }

        let response = ctx.fetcher().fetch(&format!("https://{host}")).await?;
        if ctx.check_for_stop() {
            return Ok(());
        }
        let page = analyze_page(&response, ctx.target());
        info!(host = %host, status = response.status, technologies = page.technologies.len(), "Page analysed.");

        ctx.emit(ctx.child(EventType::WebserverHttpheaders, page.headers, event));
        if let Some(banner) = page.banner {
            ctx.emit(ctx.child(EventType::WebserverBanner, banner, event));
        }
        for tech in page.technologies {
            ctx.emit(ctx.child(EventType::WebserverTechnology, tech, event));
        }
        if self.report_links {
            for link in page.internal_links {
                ctx.emit(ctx.child(EventType::LinkedUrlInternal, link, event));
            }
            for link in page.external_links {
                ctx.emit(ctx.child(EventType::LinkedUrlExternal, link, event));
            }
        } else {
            debug!(host = %host, "Link reporting disabled.");
        }
        Ok(())
    }
}

// src/core/modules/bitcoinabuse.rs

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType, tag_url};
use crate::core::module::{
    ModuleContext, ModuleMeta, ModuleOptions, OptionSpec, ResultsCache, ScanModule, Watch,
};

const CHECK_URL: &str = "https://www.bitcoinabuse.com/api/reports/check";
const REPORTS_URL: &str = "https://www.bitcoinabuse.com/reports";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AbuseReport {
    pub address: String,
    #[serde(default)]
    pub count: Option<i64>,
}

/// Reads a check response; `None` when the address has no reports.
pub fn parse_report(body: &str) -> Result<Option<AbuseReport>, ModuleError> {
    let report: AbuseReport = serde_json::from_str(body).map_err(|e| ModuleError::Parse {
        what: "BitcoinAbuse response".into(),
        reason: e.to_string(),
    })?;
    Ok(report.count.is_some_and(|c| c > 0).then_some(report))
}

/// Looks Bitcoin addresses up in the BitcoinAbuse report database.
#[derive(Default)]
pub struct BitcoinAbuse {
    api_key: String,
    error_state: bool,
    results: ResultsCache,
}

#[async_trait]
impl ScanModule for BitcoinAbuse {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: "bitcoinabuse",
            summary: "Check Bitcoin addresses against the bitcoinabuse.com database of suspect addresses.",
            use_cases: &["Passive", "Investigate"],
            categories: &["Reputation Systems"],
            flags: &["apikey"],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::Types(vec![EventType::BitcoinAddress])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::MaliciousBitcoinAddress, EventType::RawRirData]
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new("api_key", "", "BitcoinAbuse API key.")]
    }

    fn setup(&mut self, _ctx: &ModuleContext, options: ModuleOptions) -> Result<(), ModuleError> {
        self.api_key = options.get_str("api_key").trim().to_string();
        self.error_state = false;
        self.results.clear();
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        if self.error_state {
            return Ok(());
        }
        if self.api_key.is_empty() {
            ctx.error("bitcoinabuse is enabled but no API key is set").await;
            self.error_state = true;
            return Ok(());
        }
        if !self.results.first_time(&event.data) {
            return Ok(());
        }

        let url = Url::parse_with_params(
            CHECK_URL,
            &[("address", event.data.as_str()), ("api_token", self.api_key.as_str())],
        )
        .map_err(|e| ModuleError::Other(e.to_string()))?;
        let response = ctx.fetcher().fetch(url.as_str()).await?;
        if !response.is_success() {
            ctx.info(format!("no results for {}: HTTP {}", event.data, response.status))
                .await;
            return Ok(());
        }

        let Some(report) = parse_report(&response.body)? else {
            debug!(address = %event.data, "No abuse reports.");
            return Ok(());
        };
        if ctx.check_for_stop() {
            return Ok(());
        }
        let text = tag_url(
            &format!("BitcoinAbuse [{}]", report.address),
            &format!("{REPORTS_URL}/{}", report.address),
        );
        ctx.emit(ctx.child(EventType::MaliciousBitcoinAddress, text, event).with_scores(100, 100, 100));
        ctx.emit(ctx.child(EventType::RawRirData, response.body, event));
        Ok(())
    }
}

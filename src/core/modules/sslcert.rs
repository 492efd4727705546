// src/core/modules/sslcert.rs

use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType};
use crate::core::module::{
    ModuleContext, ModuleMeta, ModuleOptions, OptionSpec, ResultsCache, ScanModule, Watch,
};

/// The parts of a server certificate worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Events describing a certificate as seen at `now`.
pub fn certificate_findings(cert: &CertificateInfo, now: DateTime<Utc>, expiry_days: i64) -> Vec<(EventType, String)> {
    let mut findings = vec![
        (EventType::SslCertificateIssued, cert.subject.clone()),
        (EventType::SslCertificateIssuer, cert.issuer.clone()),
    ];
    if now > cert.not_after {
        findings.push((
            EventType::SslCertificateExpired,
            format!("{} (expired {})", cert.subject, cert.not_after.format("%Y-%m-%d")),
        ));
    } else if cert.not_after.signed_duration_since(now).num_days() <= expiry_days {
        findings.push((
            EventType::SslCertificateExpiring,
            format!("{} (expires {})", cert.subject, cert.not_after.format("%Y-%m-%d")),
        ));
    }
    findings
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn fetch_certificate(host: &str, timeout: Duration) -> Result<Option<CertificateInfo>, String> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| format!("TlsConnector error: {e}"))?;

    debug!(host, "Connecting TCP stream to port 443.");
    let stream = TcpStream::connect((host, 443)).map_err(|e| format!("TCP connection error: {e}"))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| format!("TCP socket error: {e}"))?;
    let stream = connector
        .connect(host, stream)
        .map_err(|e| format!("TLS handshake error: {e}"))?;

    let Some(cert) = stream
        .peer_certificate()
        .map_err(|e| format!("could not get peer certificate: {e}"))?
    else {
        return Ok(None);
    };
    let der = cert
        .to_der()
        .map_err(|e| format!("could not convert certificate to DER: {e}"))?;
    let (_, x509) = parse_x509_certificate(&der).map_err(|e| format!("X.509 parse error: {e}"))?;

    let validity = x509.validity();
    Ok(Some(CertificateInfo {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        not_before: asn1_time_to_chrono_utc(&validity.not_before),
        not_after: asn1_time_to_chrono_utc(&validity.not_after),
    }))
}

/// Reads the TLS certificate served on port 443 by hosts of the target.
#[derive(Default)]
pub struct SslCert {
    expiry_days: i64,
    results: ResultsCache,
}

#[async_trait]
impl ScanModule for SslCert {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: "sslcert",
            summary: "Gather information about SSL certificates used by the target's HTTPS sites.",
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
            EventType::SslCertificateIssued,
            EventType::SslCertificateIssuer,
            EventType::SslCertificateExpired,
            EventType::SslCertificateExpiring,
        ]
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new(
            "expiry_days",
            30_i64,
            "Number of days in the future a certificate expires to consider it as expiring.",
        )]
    }

    fn setup(&mut self, _ctx: &ModuleContext, options: ModuleOptions) -> Result<(), ModuleError> {
        self.expiry_days = options.get_int("expiry_days");
        self.results.clear();
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        let host = event.data.to_lowercase();
        if !ctx.target().matches(&host) || !self.results.first_time(&host) {
            return Ok(());
        }

        let timeout = Duration::from_secs(ctx.config().fetch_timeout_secs.max(1));
        let target = host.clone();
        let cert = spawn_blocking(move || fetch_certificate(&target, timeout))
            .await
            .map_err(|e| ModuleError::Other(format!("certificate task failed: {e}")))?;
        let cert = match cert {
            Ok(Some(cert)) => cert,
            Ok(None) => {
                debug!(host = %host, "No peer certificate presented.");
                return Ok(());
            }
            Err(e) => {
                debug!(host = %host, error = %e, "No certificate retrieved.");
                return Ok(());
            }
        };
        info!(host = %host, subject = %cert.subject, issuer = %cert.issuer, "Certificate retrieved.");

        for (event_type, data) in certificate_findings(&cert, Utc::now(), self.expiry_days) {
            ctx.emit(ctx.child(event_type, data, event));
        }
        Ok(())
    }
}

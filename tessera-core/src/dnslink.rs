//! DNSLink resolution over DNS-over-HTTPS
//!
//! Looks up the TXT records of `_dnslink.<domain>` and then `<domain>` through
//! a JSON DoH endpoint and returns the first `dnslink=` value.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::progress::OnProgress;
use crate::signal::AbortSignal;

pub const DEFAULT_RESOLVER: &str = "https://cloudflare-dns.com/dns-query";

const TXT_RECORD: u16 = 16;
const DNS_JSON_MIME: &str = "application/dns-json";
const DNSLINK_PREFIX: &str = "dnslink=";

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resolver returned DNS status {status} for {name}")]
    Resolver { name: String, status: u32 },

    #[error("No dnslink record found for {0}")]
    NotFound(String),
}

/// Emitted around each lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsEvent {
    Query { name: String },
    Answer { name: String, value: String },
}

impl fmt::Display for DnsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsEvent::Query { .. } => f.write_str("dnslink:query"),
            DnsEvent::Answer { .. } => f.write_str("dnslink:answer"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DnsOptions {
    pub signal: AbortSignal,
    pub on_progress: Option<OnProgress<DnsEvent>>,
}

impl DnsOptions {
    fn emit(&self, event: DnsEvent) {
        if let Some(progress) = &self.on_progress {
            progress.emit(&event);
        }
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Value of a `dnslink=` TXT record, if `record` is one
pub fn parse_dnslink(record: &str) -> Option<String> {
    let record = record.trim().trim_matches('"');
    record
        .strip_prefix(DNSLINK_PREFIX)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct DnsLinkResolver {
    endpoint: String,
    client: reqwest::Client,
}

impl DnsLinkResolver {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DnsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve the dnslink value for `domain`, e.g. `/ipfs/<cid>`
    pub async fn resolve(&self, domain: &str, opts: &DnsOptions) -> Result<String, DnsError> {
        let domain = domain.trim().trim_end_matches('.');
        if domain.is_empty() || domain.contains(char::is_whitespace) {
            return Err(DnsError::InvalidDomain(domain.to_string()));
        }

        for name in [format!("_dnslink.{}", domain), domain.to_string()] {
            if let Some(value) = self.lookup(&name, opts).await? {
                return Ok(value);
            }
        }

        Err(DnsError::NotFound(domain.to_string()))
    }

    async fn lookup(&self, name: &str, opts: &DnsOptions) -> Result<Option<String>, DnsError> {
        opts.emit(DnsEvent::Query {
            name: name.to_string(),
        });
        debug!(name, resolver = %self.endpoint, "Querying TXT records");

        let request = async {
            self.client
                .get(&self.endpoint)
                .header(reqwest::header::ACCEPT, DNS_JSON_MIME)
                .query(&[("name", name), ("type", "TXT")])
                .send()
                .await?
                .error_for_status()?
                .json::<DohResponse>()
                .await
        };

        let response = opts
            .signal
            .until_aborted(request)
            .await
            .ok_or(DnsError::Cancelled)??;

        // NXDOMAIN just means this name has no records
        match response.status {
            0 | 3 => {}
            status => {
                return Err(DnsError::Resolver {
                    name: name.to_string(),
                    status,
                })
            }
        }

        let value = response
            .answer
            .iter()
            .filter(|answer| answer.record_type == TXT_RECORD)
            .find_map(|answer| parse_dnslink(&answer.data));

        if let Some(value) = &value {
            opts.emit(DnsEvent::Answer {
                name: name.to_string(),
                value: value.clone(),
            });
        }
        Ok(value)
    }
}

impl Default for DnsLinkResolver {
    fn default() -> Self {
        Self::with_client(DEFAULT_RESOLVER, reqwest::Client::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::AbortController;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// DoH endpoint that knows a fixed set of TXT records
    async fn start_resolver(records: &'static [(&'static str, &'static str)]) -> String {
        let app = Router::new().route(
            "/dns-query",
            get(move |Query(params): Query<HashMap<String, String>>| async move {
                let name = params.get("name").cloned().unwrap_or_default();
                let answers: Vec<Value> = records
                    .iter()
                    .filter(|(record, _)| *record == name)
                    .map(|(_, data)| json!({ "name": name, "type": 16, "TTL": 60, "data": data }))
                    .collect();
                let status = if answers.is_empty() { 3 } else { 0 };
                Json(json!({ "Status": status, "Answer": answers }))
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/dns-query", addr)
    }

    fn resolver(endpoint: String) -> DnsLinkResolver {
        DnsLinkResolver::with_client(endpoint, reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_parse_dnslink() {
        assert_eq!(
            parse_dnslink("\"dnslink=/ipfs/bafkqaaa\"").as_deref(),
            Some("/ipfs/bafkqaaa")
        );
        assert_eq!(parse_dnslink("v=spf1 -all"), None);
        assert_eq!(parse_dnslink("dnslink="), None);
    }

    #[tokio::test]
    async fn test_prefers_dnslink_subdomain() {
        let endpoint = start_resolver(&[
            ("_dnslink.example.org", "\"dnslink=/ipfs/bafkqaaa\""),
            ("example.org", "\"dnslink=/ipns/elsewhere\""),
        ])
        .await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let opts = DnsOptions {
            on_progress: Some(OnProgress::new(move |event: &DnsEvent| {
                sink.lock().unwrap().push(event.to_string());
            })),
            ..Default::default()
        };

        let value = resolver(endpoint)
            .resolve("example.org", &opts)
            .await
            .unwrap();
        assert_eq!(value, "/ipfs/bafkqaaa");
        assert_eq!(*events.lock().unwrap(), vec!["dnslink:query", "dnslink:answer"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_bare_domain() {
        let endpoint = start_resolver(&[
            ("example.net", "\"v=spf1 -all\""),
            ("example.net", "\"dnslink=/ipns/example.net\""),
        ])
        .await;

        let value = resolver(endpoint)
            .resolve("example.net.", &DnsOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "/ipns/example.net");
    }

    #[tokio::test]
    async fn test_no_record_is_not_found() {
        let endpoint = start_resolver(&[]).await;

        let result = resolver(endpoint)
            .resolve("missing.example", &DnsOptions::default())
            .await;
        assert!(matches!(result, Err(DnsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_domain() {
        let result = DnsLinkResolver::default()
            .resolve("  ", &DnsOptions::default())
            .await;
        assert!(matches!(result, Err(DnsError::InvalidDomain(_))));
    }

    #[tokio::test]
    async fn test_aborted_signal_cancels_lookup() {
        let controller = AbortController::new();
        controller.abort();
        let opts = DnsOptions {
            signal: controller.signal(),
            ..Default::default()
        };

        // Never reached: the signal has already fired
        let result = resolver("http://127.0.0.1:9/dns-query".into())
            .resolve("example.org", &opts)
            .await;
        assert!(matches!(result, Err(DnsError::Cancelled)));
    }
}

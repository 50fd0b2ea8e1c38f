//! HTTP gateway broker
//!
//! Fetches raw blocks from a trustless HTTP gateway. Retrieval only: gateways
//! have nothing to announce to and no notion of sessions.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError, Capabilities, RetrieveOptions};

const RAW_BLOCK_MIME: &str = "application/vnd.ipld.raw";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GatewayBroker {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl GatewayBroker {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            name: format!("gateway({})", base_url),
            base_url,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn block_url(&self, cid: &Cid) -> String {
        format!("{}/ipfs/{}?format=raw", self.base_url, cid)
    }

    async fn fetch(&self, cid: &Cid, opts: &RetrieveOptions) -> Result<Bytes, BrokerError> {
        let url = self.block_url(cid);
        debug!(%cid, url = %url, "Fetching block from gateway");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, RAW_BLOCK_MIME)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(BrokerError::NotAvailable(*cid)),
            status => {
                return Err(BrokerError::Transport(format!(
                    "{} returned {}",
                    self.base_url, status
                )))
            }
        }

        let block = response.bytes().await?;
        opts.validate(&block)?;

        info!(%cid, gateway = %self.base_url, size = block.len(), "Fetched block from gateway");
        Ok(block)
    }
}

#[async_trait]
impl Broker for GatewayBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RETRIEVE
    }

    async fn retrieve(&self, cid: &Cid, opts: RetrieveOptions) -> Result<Bytes, BrokerError> {
        // Dropping the request future aborts the connection
        opts.signal
            .until_aborted(self.fetch(cid, &opts))
            .await
            .unwrap_or(Err(BrokerError::Cancelled))
    }
}

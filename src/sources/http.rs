//! HTTP opportunity source.
//!
//! Pulls already-normalized opportunity records from an HTTP endpoint.
//! The endpoint must return either a JSON array of opportunities or an
//! object with a `data` array.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::{sanitize, Listing, OpportunitySource};
use crate::types::Opportunity;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpSource {
    http: Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("HARVESTER/0.1.0 (yield-lifecycle-engine)")
            .build()
            .context("Failed to build HTTP client for opportunity source")?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OpportunitySource for HttpSource {
    async fn list(&self) -> Result<Vec<Opportunity>> {
        debug!(url = %self.url, "Fetching opportunities");

        let listing: Listing = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("Opportunity feed {} returned an error", self.url))?
            .json()
            .await
            .with_context(|| format!("Failed to decode opportunities from {}", self.url))?;

        let opportunities = sanitize(self.name(), listing.into_vec());
        info!(count = opportunities.len(), "Opportunities fetched");
        Ok(opportunities)
    }

    fn name(&self) -> &str {
        "http"
    }
}

//! File-backed opportunity source.
//!
//! Re-reads a JSON file on every call so an external process (or an
//! operator) can update the listing between ticks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::{sanitize, Listing, OpportunitySource};
use crate::types::Opportunity;

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OpportunitySource for JsonFileSource {
    async fn list(&self) -> Result<Vec<Opportunity>> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read opportunities from {}", self.path.display()))?;
        let listing: Listing = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse opportunities in {}", self.path.display()))?;

        let opportunities = sanitize(self.name(), listing.into_vec());
        debug!(path = %self.path.display(), count = opportunities.len(), "Opportunities read");
        Ok(opportunities)
    }

    fn name(&self) -> &str {
        "file"
    }
}

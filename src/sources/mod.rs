//! Opportunity sources.
//!
//! Defines the `OpportunitySource` trait the engine pulls from and provides
//! implementations for:
//! - `StaticSource` — in-memory list, swappable at runtime (tests, replays)
//! - `JsonFileSource` — a JSON file re-read on every call
//! - `HttpSource` — an HTTP endpoint serving normalized records

pub mod file;
pub mod http;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::RwLock;
use tracing::warn;

use crate::types::Opportunity;

pub use file::JsonFileSource;
pub use http::HttpSource;

/// Abstraction over opportunity feeds.
///
/// Implementors return the current listing in their preferred order; the
/// engine evaluates entries in that order and looks up exits by id within
/// the same listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    /// Fetch all currently listed opportunities. May be empty.
    async fn list(&self) -> Result<Vec<Opportunity>>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Accepts either a bare array or an envelope with a `data` array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Listing {
    Bare(Vec<Opportunity>),
    Envelope { data: Vec<Opportunity> },
}

impl Listing {
    pub(crate) fn into_vec(self) -> Vec<Opportunity> {
        match self {
            Listing::Bare(v) => v,
            Listing::Envelope { data } => data,
        }
    }
}

/// Drop records whose metrics are not usable numbers.
pub(crate) fn sanitize(source: &str, opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
    let before = opportunities.len();
    let kept: Vec<Opportunity> = opportunities
        .into_iter()
        .filter(|o| {
            let ok = !o.id.is_empty()
                && [o.yield_rate, o.price, o.liquidity, o.volume]
                    .iter()
                    .all(|v| v.is_finite());
            if !ok {
                warn!(source, id = %o.id, "Dropping malformed opportunity record");
            }
            ok
        })
        .collect();
    if kept.len() < before {
        warn!(source, dropped = before - kept.len(), "Malformed records dropped");
    }
    kept
}

// ---------------------------------------------------------------------------
// Static source
// ---------------------------------------------------------------------------

/// An in-memory source whose listing can be replaced between calls.
#[derive(Debug, Default)]
pub struct StaticSource {
    opportunities: RwLock<Vec<Opportunity>>,
    /// If set, `list` fails with this message.
    failure: RwLock<Option<String>>,
}

impl StaticSource {
    pub fn new(opportunities: Vec<Opportunity>) -> Self {
        Self {
            opportunities: RwLock::new(opportunities),
            failure: RwLock::new(None),
        }
    }

    /// Replace the listing returned by subsequent calls.
    pub fn set(&self, opportunities: Vec<Opportunity>) {
        *self.opportunities.write().unwrap_or_else(|e| e.into_inner()) = opportunities;
    }

    /// Force all subsequent calls to fail with `msg`.
    pub fn set_error(&self, msg: &str) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl OpportunitySource for StaticSource {
    async fn list(&self) -> Result<Vec<Opportunity>> {
        if let Some(msg) = self.failure.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bail!("{msg}");
        }
        Ok(self
            .opportunities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

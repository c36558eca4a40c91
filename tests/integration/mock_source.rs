//! Mock opportunity source for integration testing.
//!
//! Serves a fixed universe of pools whose yields drift by a controllable
//! factor between calls. All state is in-memory.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use harvester::sources::OpportunitySource;
use harvester::types::Opportunity;

pub struct MockSource {
    pools: Mutex<Vec<Opportunity>>,
    /// Multiplier applied to every yield on each `list` call.
    drift: Mutex<f64>,
    /// If set, `list` fails with this message.
    force_error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new(pools: Vec<Opportunity>) -> Self {
        Self {
            pools: Mutex::new(pools),
            drift: Mutex::new(1.0),
            force_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// `count` healthy pools listed a week before `now`, yields 35%..
    pub fn with_pools(count: usize, now: DateTime<Utc>) -> Self {
        let pools = (0..count)
            .map(|i| pool(&format!("pool-{i:02}"), 0.35 + i as f64 * 0.01, now))
            .collect();
        Self::new(pools)
    }

    pub fn set_drift(&self, factor: f64) {
        *self.drift.lock().unwrap() = factor;
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Stop listing a pool, as if it were delisted upstream.
    pub fn delist(&self, id: &str) {
        self.pools.lock().unwrap().retain(|p| p.id != id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpportunitySource for MockSource {
    async fn list(&self) -> Result<Vec<Opportunity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            bail!("{msg}");
        }
        let factor = *self.drift.lock().unwrap();
        let mut pools = self.pools.lock().unwrap();
        for p in pools.iter_mut() {
            p.yield_rate *= factor;
        }
        Ok(pools.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn pool(id: &str, yield_rate: f64, now: DateTime<Utc>) -> Opportunity {
    Opportunity {
        id: id.to_string(),
        name: id.to_uppercase(),
        provenance: "mock-dex".to_string(),
        yield_rate,
        price: 1.0,
        liquidity: 10_000.0,
        volume: 1_000.0,
        listed_at: now - Duration::days(7),
    }
}

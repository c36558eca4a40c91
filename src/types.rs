//! Shared types for the HARVESTER engine.
//!
//! These types form the data model used across all modules: the
//! opportunity snapshots fed in by a source, the positions the engine
//! holds, the aggregate statistics, and the persisted engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

const MS_PER_HOUR: f64 = 3_600_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_HOUR
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A normalized, point-in-time snapshot of a yield-bearing venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    /// Display name, e.g. "USDC-ETH".
    pub name: String,
    /// Where the opportunity comes from (protocol, chain, feed).
    pub provenance: String,
    /// Current yield as a fraction (0.45 = 45%).
    pub yield_rate: f64,
    pub price: f64,
    /// Liquidity depth in quote currency.
    pub liquidity: f64,
    /// Trailing volume in quote currency.
    pub volume: f64,
    /// When the venue was first listed. Drives the age filter.
    pub listed_at: DateTime<Utc>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) yield={:.2}% liq=${:.0} vol=${:.0}",
            self.provenance,
            self.name,
            self.id,
            self.yield_rate * 100.0,
            self.liquidity,
            self.volume,
        )
    }
}

impl Opportunity {
    /// Age of the listing in fractional days.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.listed_at).num_milliseconds() as f64 / MS_PER_DAY
    }

    /// Helper to build a test opportunity with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str, yield_rate: f64) -> Self {
        Opportunity {
            id: id.to_string(),
            name: format!("{id}-POOL"),
            provenance: "uniswap-v3".to_string(),
            yield_rate,
            price: 1.0,
            liquidity: 5000.0,
            volume: 200.0,
            listed_at: Utc::now() - chrono::Duration::days(3),
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Where exit values came from at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitSource {
    /// The opportunity was still listed; its current record priced the exit.
    Live,
    /// The opportunity was gone (or the source was down); entry values reused.
    EntrySnapshot,
}

/// Exit-only fields, present once a position is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub closed_at: DateTime<Utc>,
    pub exit_yield_rate: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub realized_pnl_percent: f64,
    pub held_duration_hours: f64,
    pub exit_source: ExitSource,
}

impl Settlement {
    pub fn is_profitable(&self) -> bool {
        self.realized_pnl > 0.0
    }
}

/// Two-state lifecycle. Exit fields only exist inside `Closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    Closed(Settlement),
}

/// A simulated stake in one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub opportunity_id: String,
    pub name: String,
    pub provenance: String,
    pub entry_yield_rate: f64,
    pub entry_price: f64,
    pub entry_liquidity: f64,
    pub entry_volume: f64,
    pub committed_amount: f64,
    pub opened_at: DateTime<Utc>,
    pub state: PositionState,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            PositionState::Open => write!(
                f,
                "[OPEN] {} {} entry={:.2}% ${:.2} since {}",
                self.opportunity_id,
                self.name,
                self.entry_yield_rate * 100.0,
                self.committed_amount,
                self.opened_at.format("%Y-%m-%d %H:%M"),
            ),
            PositionState::Closed(s) => {
                let sign = if s.realized_pnl >= 0.0 { "+" } else { "" };
                write!(
                    f,
                    "[CLOSED] {} {} {:.2}% -> {:.2}% pnl={sign}{:.2} ({sign}{:.2}%) held={:.1}h",
                    self.opportunity_id,
                    self.name,
                    self.entry_yield_rate * 100.0,
                    s.exit_yield_rate * 100.0,
                    s.realized_pnl,
                    s.realized_pnl_percent,
                    s.held_duration_hours,
                )
            }
        }
    }
}

impl Position {
    /// Open a new position from an opportunity snapshot.
    pub fn open(opportunity: &Opportunity, committed_amount: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id: opportunity.id.clone(),
            name: opportunity.name.clone(),
            provenance: opportunity.provenance.clone(),
            entry_yield_rate: opportunity.yield_rate,
            entry_price: opportunity.price,
            entry_liquidity: opportunity.liquidity,
            entry_volume: opportunity.volume,
            committed_amount,
            opened_at: now,
            state: PositionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open)
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        match &self.state {
            PositionState::Open => None,
            PositionState::Closed(s) => Some(s),
        }
    }

    /// Hours elapsed since entry.
    pub fn held_hours(&self, now: DateTime<Utc>) -> f64 {
        hours_between(self.opened_at, now)
    }

    /// Transition OPEN → CLOSED. Returns false (and changes nothing) if the
    /// position was already closed.
    pub fn close(&mut self, settlement: Settlement) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state = PositionState::Closed(settlement);
        true
    }
}

// ---------------------------------------------------------------------------
// Aggregate statistics
// ---------------------------------------------------------------------------

/// Running totals over every position the engine has handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_opened: u64,
    pub total_settled: u64,
    pub profitable_count: u64,
    pub loss_count: u64,
    pub cumulative_profit: f64,
    /// Magnitude (always >= 0).
    pub cumulative_loss: f64,
    /// Mean `held_duration_hours` over all settled positions.
    pub avg_hold_hours: f64,
}

impl fmt::Display for AggregateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opened={} settled={} (W{}/L{}) win_rate={:.1}% net=${:.2} avg_hold={:.1}h",
            self.total_opened,
            self.total_settled,
            self.profitable_count,
            self.loss_count,
            self.win_rate(),
            self.net_pnl(),
            self.avg_hold_hours,
        )
    }
}

impl AggregateStats {
    pub fn net_pnl(&self) -> f64 {
        self.cumulative_profit - self.cumulative_loss
    }

    /// Win rate as a percentage. Returns 0.0 if nothing has settled.
    pub fn win_rate(&self) -> f64 {
        if self.total_settled == 0 {
            0.0
        } else {
            (self.profitable_count as f64 / self.total_settled as f64) * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// The persisted root: open positions, settled history, and stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// OPEN positions keyed by opportunity id.
    open: HashMap<String, Position>,
    /// Position id → opportunity id. Rebuilt after load.
    #[serde(skip)]
    by_id: HashMap<Uuid, String>,
    /// CLOSED positions in settlement order.
    history: Vec<Position>,
    stats: AggregateStats,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_open(&self, opportunity_id: &str) -> bool {
        self.open.contains_key(opportunity_id)
    }

    pub fn get_open(&self, opportunity_id: &str) -> Option<&Position> {
        self.open.get(opportunity_id)
    }

    pub fn get_by_id(&self, id: &Uuid) -> Option<&Position> {
        self.by_id.get(id).and_then(|opp| self.open.get(opp))
    }

    /// Snapshot of OPEN positions, oldest first.
    pub fn open_positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.open.values().cloned().collect();
        out.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        out
    }

    pub fn history(&self) -> &[Position] {
        &self.history
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut AggregateStats {
        &mut self.stats
    }

    /// Insert a freshly opened position. Enforces uniqueness.
    pub fn insert_open(&mut self, position: Position) -> Result<(), Rejection> {
        if self.open.contains_key(&position.opportunity_id) {
            return Err(Rejection::AlreadyOpen {
                opportunity_id: position.opportunity_id,
            });
        }
        self.by_id.insert(position.id, position.opportunity_id.clone());
        self.open.insert(position.opportunity_id.clone(), position);
        self.stats.total_opened += 1;
        Ok(())
    }

    /// Move an open position into history with the given settlement.
    /// Stats are left to the caller.
    pub(crate) fn close(&mut self, opportunity_id: &str, settlement: Settlement) -> Option<&Position> {
        let mut position = self.open.remove(opportunity_id)?;
        self.by_id.remove(&position.id);
        position.close(settlement);
        self.history.push(position);
        self.history.last()
    }

    /// Rebuild the id index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.by_id = self
            .open
            .iter()
            .map(|(opp, p)| (p.id, opp.clone()))
            .collect();
    }

    /// Check the structural invariants a decoded state must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        for (key, position) in &self.open {
            if key != &position.opportunity_id {
                return Err(format!(
                    "open position {} filed under {key} but references {}",
                    position.id, position.opportunity_id
                ));
            }
            if !position.is_open() {
                return Err(format!("closed position {} in open set", position.id));
            }
        }
        if let Some(p) = self.history.iter().find(|p| p.is_open()) {
            return Err(format!("open position {} in history", p.id));
        }
        if self.stats.total_settled != self.history.len() as u64 {
            return Err(format!(
                "stats report {} settled but history holds {}",
                self.stats.total_settled,
                self.history.len()
            ));
        }
        if self.stats.profitable_count + self.stats.loss_count != self.stats.total_settled {
            return Err(format!(
                "stats report {} wins and {} losses over {} settled",
                self.stats.profitable_count, self.stats.loss_count, self.stats.total_settled
            ));
        }
        let handled = (self.open.len() + self.history.len()) as u64;
        if self.stats.total_opened < handled {
            return Err(format!(
                "stats report {} opened but state holds {handled} positions",
                self.stats.total_opened
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why an opportunity was not entered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("opportunity {opportunity_id} already has an open position")]
    AlreadyOpen { opportunity_id: String },

    #[error("yield {:.2}% below threshold {:.2}%", .yield_rate * 100.0, .threshold * 100.0)]
    YieldBelowThreshold { yield_rate: f64, threshold: f64 },

    #[error("liquidity ${liquidity:.0} below minimum ${minimum:.0}")]
    InsufficientLiquidity { liquidity: f64, minimum: f64 },

    #[error("volume ${volume:.0} below minimum ${minimum:.0}")]
    InsufficientVolume { volume: f64, minimum: f64 },

    #[error("listed {age_days:.1} days ago, max {max_days} days")]
    TooOld { age_days: f64, max_days: u32 },

    #[error("at capacity ({open}/{max} open)")]
    AtCapacity { open: usize, max: usize },
}

impl Rejection {
    /// Stable short label for counting and logging.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::AlreadyOpen { .. } => "already_open",
            Rejection::YieldBelowThreshold { .. } => "yield_below_threshold",
            Rejection::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Rejection::InsufficientVolume { .. } => "insufficient_volume",
            Rejection::TooOld { .. } => "too_old",
            Rejection::AtCapacity { .. } => "at_capacity",
        }
    }
}

/// Failures of the durable store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt state: {0}")]
    Corrupt(String),
}

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Opportunity source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Policy violation: {0}")]
    PolicyViolation(#[from] Rejection),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

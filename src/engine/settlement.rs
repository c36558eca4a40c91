//! Exit evaluation and P&L computation.
//!
//! Profitability is a proxy: it tracks the relative drift of the yield
//! rate between entry and exit. Impermanent loss, fees and slippage are
//! not modeled.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{ExitSource, Opportunity, Position, Settlement};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettlementError {
    #[error("position {position_id} has unusable entry yield {entry_yield_rate}")]
    MalformedSnapshot {
        position_id: String,
        entry_yield_rate: f64,
    },

    #[error("position {0} is already closed")]
    AlreadyClosed(String),
}

/// Whether an open position has been held long enough to settle.
pub fn is_due(position: &Position, hold_duration_hours: f64, now: DateTime<Utc>) -> bool {
    position.is_open() && position.held_hours(now) >= hold_duration_hours
}

/// Compute the settlement for a due position.
///
/// `current` is the opportunity's latest record, if it is still listed.
/// When it is not, the entry snapshot stands in for the exit values.
pub fn settle(
    position: &Position,
    current: Option<&Opportunity>,
    now: DateTime<Utc>,
) -> Result<Settlement, SettlementError> {
    if !position.is_open() {
        return Err(SettlementError::AlreadyClosed(position.id.to_string()));
    }
    let entry = position.entry_yield_rate;
    if !(entry.is_finite() && entry > 0.0) || !position.committed_amount.is_finite() {
        return Err(SettlementError::MalformedSnapshot {
            position_id: position.id.to_string(),
            entry_yield_rate: entry,
        });
    }

    let (exit_yield_rate, exit_price, exit_source) = match current {
        Some(opp) => (opp.yield_rate, opp.price, ExitSource::Live),
        None => {
            debug!(
                opportunity_id = %position.opportunity_id,
                "Opportunity no longer listed, settling at entry values"
            );
            (entry, position.entry_price, ExitSource::EntrySnapshot)
        }
    };

    let yield_delta = exit_yield_rate - entry;
    let realized_pnl_percent = (yield_delta / entry) * 100.0;
    let realized_pnl = (realized_pnl_percent / 100.0) * position.committed_amount;

    Ok(Settlement {
        closed_at: now,
        exit_yield_rate,
        exit_price,
        realized_pnl,
        realized_pnl_percent,
        held_duration_hours: position.held_hours(now),
        exit_source,
    })
}

//! Accountant — settlement bookkeeping and aggregate statistics.
//!
//! Moves a settled position into history and folds its outcome into the
//! running totals. The mean hold duration is recomputed over the full
//! history on every settlement rather than updated incrementally.

use tracing::info;

use crate::types::{AggregateStats, EngineState, Position, Settlement};

pub struct Accountant;

impl Accountant {
    /// Close the open position for `opportunity_id` and update stats.
    ///
    /// Returns the closed position, or `None` if nothing was open under
    /// that id (in which case state is untouched).
    pub fn settle(
        state: &mut EngineState,
        opportunity_id: &str,
        settlement: Settlement,
    ) -> Option<Position> {
        let closed = state.close(opportunity_id, settlement)?.clone();
        let avg_hold_hours = Self::mean_hold_hours(state.history());

        let stats = state.stats_mut();
        if let Some(s) = closed.settlement() {
            Self::record(stats, s);
        }
        stats.avg_hold_hours = avg_hold_hours;

        info!(
            opportunity_id = %closed.opportunity_id,
            settled = stats.total_settled,
            net = format!("${:.2}", stats.net_pnl()),
            avg_hold_hours = format!("{:.1}", stats.avg_hold_hours),
            "Settlement recorded"
        );

        Some(closed)
    }

    /// Fold one outcome into the counters and cumulative totals.
    fn record(stats: &mut AggregateStats, settlement: &Settlement) {
        stats.total_settled += 1;
        if settlement.is_profitable() {
            stats.profitable_count += 1;
            stats.cumulative_profit += settlement.realized_pnl;
        } else {
            stats.loss_count += 1;
            stats.cumulative_loss += settlement.realized_pnl.abs();
        }
    }

    /// Mean `held_duration_hours` over settled positions; 0.0 when empty.
    pub fn mean_hold_hours(history: &[Position]) -> f64 {
        let held: Vec<f64> = history
            .iter()
            .filter_map(|p| p.settlement())
            .map(|s| s.held_duration_hours)
            .collect();
        if held.is_empty() {
            0.0
        } else {
            held.iter().sum::<f64>() / held.len() as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
